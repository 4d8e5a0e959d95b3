use crate::peer::MediaStream;
use std::{
    cell::RefCell,
    rc::Rc,
};

/// Playback of the audio of a received stream.
pub trait AudioSink {
    fn set_muted(&mut self, muted: bool);

    fn is_muted(&self) -> bool;

    /// Stops playback and releases the stream.
    fn detach(&mut self);
}

pub trait AudioSinkFactory {
    fn attach(&self, stream: &MediaStream) -> Box<dyn AudioSink>;
}

/// Audio sink owned by a participant model. Playback is detached when it is
/// dropped, so a sink never outlives the stream it was created for.
#[derive(derive_more::Debug)]
pub(crate) struct ScopedAudioSink {
    stream: MediaStream,
    #[debug(skip)]
    sink: Box<dyn AudioSink>,
}

impl ScopedAudioSink {
    pub(crate) fn attach(factory: &dyn AudioSinkFactory, stream: &MediaStream, muted: bool) -> Self {
        let mut sink = factory.attach(stream);
        sink.set_muted(muted);
        Self {
            stream: stream.clone(),
            sink,
        }
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        self.sink.set_muted(muted);
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.sink.is_muted()
    }
}

impl Drop for ScopedAudioSink {
    fn drop(&mut self) {
        trace!(stream = %self.stream, "detaching audio sink");
        self.sink.detach();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Attached(MediaStream),
    Muted(MediaStream, bool),
    Detached(MediaStream),
}

/// Audio output that plays nothing and records what happened to its sinks.
#[derive(Debug, Default, Clone)]
pub struct LocalAudioOutput {
    events: Rc<RefCell<Vec<SinkEvent>>>,
}

impl LocalAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    /// Number of sinks currently attached.
    pub fn attached(&self) -> usize {
        self.events.borrow().iter().fold(0, |attached, event| match event {
            SinkEvent::Attached(_) => attached + 1,
            SinkEvent::Detached(_) => attached - 1,
            SinkEvent::Muted(..) => attached,
        })
    }
}

impl AudioSinkFactory for LocalAudioOutput {
    fn attach(&self, stream: &MediaStream) -> Box<dyn AudioSink> {
        self.events.borrow_mut().push(SinkEvent::Attached(stream.clone()));
        Box::new(LocalSink {
            stream: stream.clone(),
            muted: false,
            detached: false,
            events: self.events.clone(),
        })
    }
}

struct LocalSink {
    stream: MediaStream,
    muted: bool,
    detached: bool,
    events: Rc<RefCell<Vec<SinkEvent>>>,
}

impl AudioSink for LocalSink {
    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.events
            .borrow_mut()
            .push(SinkEvent::Muted(self.stream.clone(), muted));
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn detach(&mut self) {
        if std::mem::replace(&mut self.detached, true) {
            return;
        }
        self.events.borrow_mut().push(SinkEvent::Detached(self.stream.clone()));
    }
}
