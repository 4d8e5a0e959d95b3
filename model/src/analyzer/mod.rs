use crate::{
    observable::{
        AttributeStore,
        StoreEvent,
        SubscriptionId,
    },
    participant::ParticipantCollection,
};
use std::{
    cell::{
        Cell,
        RefCell,
    },
    fmt,
    rc::Rc,
};
use strum::IntoEnumIterator as _;

mod quality;

pub use quality::{
    grade,
    ConnectionQuality,
    LocalMedia,
    LocalMediaState,
    LocalParticipant,
    QualityAnalyzer,
    QualityAnalyzerFactory,
    QualityAttribute,
    QualityChangeHandler,
    SenderQualityGrades,
    StatsQualityAnalyzer,
    StatsQualityAnalyzerFactory,
};

/// Call wide quality attributes.
///
/// Publishes the sender quality grades of the local participant. Without a
/// local participant (media routed through an MCU) no analyzer is created and
/// every grade stays [`ConnectionQuality::Unknown`].
#[derive(Clone)]
pub struct CallAnalyzer {
    inner: Rc<Inner>,
}

struct Inner {
    store: AttributeStore<SenderQualityGrades, CallAnalyzer>,
    analyzer: RefCell<Option<Rc<dyn QualityAnalyzer>>>,
    subscriptions: RefCell<Vec<(QualityAttribute, SubscriptionId)>>,
    // Kept for receiver side analysis.
    participants: ParticipantCollection,
    destroyed: Cell<bool>,
}

impl fmt::Debug for CallAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallAnalyzer")
            .field("store", &self.inner.store)
            .field("has_analyzer", &self.inner.analyzer.borrow().is_some())
            .field("participants", &self.inner.participants)
            .finish()
    }
}

impl CallAnalyzer {
    pub fn new(
        local_media: Rc<dyn LocalMedia>,
        local: Option<&LocalParticipant>,
        participants: ParticipantCollection,
        factory: &dyn QualityAnalyzerFactory,
    ) -> Self {
        let call_analyzer = Self {
            inner: Rc::new(Inner {
                store: AttributeStore::new(SenderQualityGrades::default()),
                analyzer: RefCell::new(None),
                subscriptions: RefCell::new(Vec::new()),
                participants,
                destroyed: Cell::new(false),
            }),
        };

        let Some(local) = local else {
            debug!("no local participant, sender quality is not analyzed");
            return call_analyzer;
        };

        let analyzer = factory.sender_analyzer(local_media, local);
        let subscriptions = QualityAttribute::iter()
            .map(|attribute| {
                let weak = Rc::downgrade(&call_analyzer.inner);
                let id = analyzer.on_change(
                    attribute,
                    Rc::new(move |quality| {
                        if let Some(inner) = weak.upgrade() {
                            let owner = CallAnalyzer { inner };
                            owner.inner.store.set(&owner, attribute, quality);
                        }
                    }),
                );
                (attribute, id)
            })
            .collect();
        *call_analyzer.inner.subscriptions.borrow_mut() = subscriptions;
        *call_analyzer.inner.analyzer.borrow_mut() = Some(analyzer);
        call_analyzer
    }

    pub fn get(&self, attribute: QualityAttribute) -> ConnectionQuality {
        self.inner.store.get(attribute)
    }

    pub fn on<F>(&self, event: StoreEvent<QualityAttribute>, handler: F) -> SubscriptionId
    where
        F: Fn(&CallAnalyzer, &ConnectionQuality) + 'static,
    {
        self.inner.store.on(event, handler)
    }

    pub fn off(&self, event: StoreEvent<QualityAttribute>, id: SubscriptionId) -> bool {
        self.inner.store.off(event, id)
    }

    pub fn sender_quality_audio(&self) -> ConnectionQuality {
        self.get(QualityAttribute::SenderQualityAudio)
    }

    pub fn sender_quality_video(&self) -> ConnectionQuality {
        self.get(QualityAttribute::SenderQualityVideo)
    }

    pub fn sender_quality_screen(&self) -> ConnectionQuality {
        self.get(QualityAttribute::SenderQualityScreen)
    }

    pub fn grades(&self) -> SenderQualityGrades {
        self.inner.store.read(|grades| *grades)
    }

    pub fn participants(&self) -> &ParticipantCollection {
        &self.inner.participants
    }

    pub fn has_analyzer(&self) -> bool {
        self.inner.analyzer.borrow().is_some()
    }

    /// Runs one analysis round of the owned analyzer, if any.
    pub fn analyze(&self) {
        let analyzer = self.inner.analyzer.borrow().clone();
        if let Some(analyzer) = analyzer {
            analyzer.analyze();
        }
    }

    /// Unsubscribes from the owned analyzer and releases it. Calling it again
    /// is a no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.borrow_mut());
        let analyzer = self.inner.analyzer.borrow_mut().take();
        if let Some(analyzer) = analyzer {
            for (attribute, id) in subscriptions {
                analyzer.off_change(attribute, id);
            }
            analyzer.destroy();
        }
        debug!("call analyzer destroyed");
    }
}
