use call_simulator_config::ModelOptions;
use call_simulator_model::{
    participant::{
        RaisedHand,
        SimulcastQuality,
        SinkEvent,
    },
    peer::LocalPeer,
    signaling::{
        ChannelPayload,
        ControlMessage,
        SignalingEventKind,
        TrackKind,
    },
    CallContext,
    ConnectionState,
    LocalAudioOutput,
    LocalPeerRegistry,
    LocalSignalingHub,
    MediaStream,
    ParticipantAttribute,
    ParticipantConnection,
    ParticipantValue,
    PeerKey,
    PeerSlot,
    SignalingEvent,
    StoreEvent,
    TriState,
};
use pretty_assertions::assert_eq;
use std::{
    cell::RefCell,
    rc::Rc,
};
use strum::IntoEnumIterator as _;

struct Call {
    hub: Rc<LocalSignalingHub>,
    peers: Rc<LocalPeerRegistry>,
    output: LocalAudioOutput,
    context: CallContext,
}

impl Call {
    fn new() -> Self {
        let hub = Rc::new(LocalSignalingHub::new());
        let peers = Rc::new(LocalPeerRegistry::new());
        let output = LocalAudioOutput::new();
        let context = CallContext::new(
            hub.clone(),
            peers.clone(),
            Rc::new(output.clone()),
            ModelOptions::default(),
        );
        Self {
            hub,
            peers,
            output,
            context,
        }
    }

    fn participant(&self, peer_id: &str) -> ParticipantConnection {
        ParticipantConnection::new(peer_id, &self.context)
    }

    fn media_peer(&self, peer_id: &str, stream: Option<&str>) -> Rc<LocalPeer> {
        let peer = self.peers.insert(PeerKey::media(peer_id));
        peer.set_stream(stream.map(MediaStream::new));
        peer
    }

    fn unmute(&self, id: &str, kind: TrackKind) {
        self.hub.dispatch(&SignalingEvent::Unmute {
            id: id.to_string(),
            kind,
        });
    }
}

#[test]
fn every_reported_state_maps_to_the_connection_state() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", Some("s1"));
    peer.set_nick(Some("Alice".to_string()));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));

    for state in ConnectionState::iter() {
        peer.set_ice_connection_state(state.to_string());
        assert_eq!(participant.connection_state(), state);
    }
}

#[test]
fn restarting_connection_forgets_media_state() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));

    peer.set_ice_connection_state("connected");
    call.unmute("P1", TrackKind::Audio);
    call.unmute("P1", TrackKind::Video);
    assert_eq!(participant.audio_available(), TriState::True);
    assert_eq!(participant.video_available(), TriState::True);

    peer.set_ice_connection_state("checking");
    assert_eq!(participant.connection_state(), ConnectionState::Checking);
    assert_eq!(participant.audio_available(), TriState::Unknown);
    assert_eq!(participant.speaking(), TriState::Unknown);
    assert_eq!(participant.video_available(), TriState::Unknown);
}

#[test]
fn unexpected_state_leaves_everything_untouched() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", None);
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    peer.set_ice_connection_state("connected");
    let before = participant.attributes();

    let changes = Rc::new(RefCell::new(0));
    let counter = changes.clone();
    participant.on(StoreEvent::Change(ParticipantAttribute::ConnectionState), move |_, _| {
        *counter.borrow_mut() += 1;
    });

    peer.set_ice_connection_state("exploded");
    assert_eq!(participant.attributes(), before);
    assert_eq!(*changes.borrow(), 0);
}

#[test]
fn binding_connected_peer_adopts_its_nick() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", None);
    peer.set_nick(Some("Alice".to_string()));
    peer.set_ice_connection_state("connected");

    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));

    assert_eq!(participant.connection_state(), ConnectionState::Connected);
    assert_eq!(participant.name(), Some("Alice".to_string()));
}

#[test]
fn failed_connection_wins_over_disconnected_ice_state() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", None);
    peer.set_connection_state("failed");
    peer.set_ice_connection_state("disconnected");

    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    assert_eq!(participant.connection_state(), ConnectionState::Failed);

    peer.set_ice_connection_state("connected");
    assert_eq!(participant.connection_state(), ConnectionState::Connected);

    peer.set_ice_connection_state("disconnected");
    assert_eq!(participant.connection_state(), ConnectionState::Failed);
}

#[test]
fn binding_no_media_peer_means_no_streams() {
    let call = Call::new();
    let participant = call.participant("P1");

    participant.bind(PeerSlot::Media, None);

    assert_eq!(participant.connection_state(), ConnectionState::Completed);
    assert_eq!(participant.audio_available(), TriState::False);
    assert_eq!(participant.speaking(), TriState::False);
    assert_eq!(participant.video_available(), TriState::False);
    assert_eq!(participant.media_peer(), None);
}

#[test]
fn binding_attaches_muted_audio_sink_until_audio_is_available() {
    let call = Call::new();
    let participant = call.participant("P1");
    call.media_peer("P1", Some("s1"));

    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    assert_eq!(participant.stream(), Some(MediaStream::new("s1")));
    assert_eq!(participant.is_audio_muted(), Some(true));

    call.unmute("P1", TrackKind::Audio);
    assert_eq!(participant.is_audio_muted(), Some(false));
    assert_eq!(participant.audio_available(), TriState::True);

    assert_eq!(
        call.output.events(),
        vec![
            SinkEvent::Attached(MediaStream::new("s1")),
            SinkEvent::Muted(MediaStream::new("s1"), true),
            SinkEvent::Muted(MediaStream::new("s1"), false),
        ]
    );
}

#[test]
fn stream_events_follow_the_bound_peers() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", None);
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    assert!(!participant.has_audio_sink());

    peer.set_stream(Some(MediaStream::new("s1")));
    call.hub.dispatch(&SignalingEvent::PeerStreamAdded {
        peer: PeerKey::media("P1"),
    });
    assert_eq!(participant.stream(), Some(MediaStream::new("s1")));
    assert_eq!(call.output.attached(), 1);

    // Stream of a peer that is not bound to this participant.
    call.hub.dispatch(&SignalingEvent::PeerStreamRemoved {
        peer: PeerKey::media("P2"),
    });
    assert_eq!(participant.stream(), Some(MediaStream::new("s1")));

    call.unmute("P1", TrackKind::Video);
    call.hub.dispatch(&SignalingEvent::PeerStreamRemoved {
        peer: PeerKey::media("P1"),
    });
    assert_eq!(participant.stream(), None);
    assert_eq!(participant.video_available(), TriState::Unknown);
    assert_eq!(call.output.attached(), 0);
}

#[test]
fn screen_peer_only_touches_the_screen_stream() {
    let call = Call::new();
    let participant = call.participant("P1");
    let screen = call.peers.insert(PeerKey::screen("P1"));
    screen.set_stream(Some(MediaStream::new("screen")));

    participant.bind(PeerSlot::Screen, Some(PeerKey::screen("P1")));
    assert_eq!(participant.screen_peer(), Some(PeerKey::screen("P1")));
    assert_eq!(participant.screen_stream(), Some(MediaStream::new("screen")));
    assert_eq!(participant.connection_state(), ConnectionState::New);
    assert!(!participant.has_audio_sink());

    call.hub.dispatch(&SignalingEvent::PeerStreamRemoved {
        peer: PeerKey::screen("P1"),
    });
    assert_eq!(participant.screen_stream(), None);

    call.hub.dispatch(&SignalingEvent::PeerStreamAdded {
        peer: PeerKey::screen("P1"),
    });
    assert_eq!(participant.screen_stream(), Some(MediaStream::new("screen")));

    participant.unbind(PeerSlot::Screen);
    assert_eq!(participant.screen_peer(), None);
    assert_eq!(participant.screen_stream(), None);
}

#[test]
fn video_mute_only_affects_video() {
    let call = Call::new();
    let participant = call.participant("P1");
    call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    call.unmute("P1", TrackKind::Audio);
    call.unmute("P1", TrackKind::Video);

    call.hub.dispatch(&SignalingEvent::Mute {
        id: "P2".to_string(),
        kind: TrackKind::Video,
    });
    assert_eq!(participant.video_available(), TriState::True);

    call.hub.dispatch(&SignalingEvent::Mute {
        id: "P1".to_string(),
        kind: TrackKind::Video,
    });
    assert_eq!(participant.video_available(), TriState::False);
    assert_eq!(participant.audio_available(), TriState::True);
    assert_eq!(participant.speaking(), TriState::Unknown);

    call.hub.dispatch(&SignalingEvent::Mute {
        id: "P1".to_string(),
        kind: TrackKind::Audio,
    });
    assert_eq!(participant.audio_available(), TriState::False);
    assert_eq!(participant.speaking(), TriState::False);
    assert_eq!(participant.is_audio_muted(), Some(true));
}

#[test]
fn mute_is_ignored_without_a_bound_peer() {
    let call = Call::new();
    let participant = call.participant("P1");

    call.hub.dispatch(&SignalingEvent::Unmute {
        id: "P1".to_string(),
        kind: TrackKind::Audio,
    });

    assert_eq!(participant.audio_available(), TriState::Unknown);
}

#[test]
fn force_mute_needs_a_media_peer() {
    let call = Call::new();
    let participant = call.participant("P1");

    participant.force_mute();
    assert!(call.hub.sent_messages().is_empty());
    assert_eq!(participant.audio_available(), TriState::Unknown);

    call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    call.unmute("P1", TrackKind::Audio);

    participant.force_mute();
    assert_eq!(
        call.hub.sent_messages(),
        vec![ControlMessage::ForceMute {
            peer_id: "P1".to_string()
        }]
    );
    assert_eq!(participant.audio_available(), TriState::False);
    assert_eq!(participant.speaking(), TriState::False);
    assert_eq!(participant.is_audio_muted(), Some(true));
}

#[test]
fn speaking_follows_recognized_data_channels() {
    let call = Call::new();
    let participant = call.participant("P1");
    call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));

    let message = |label: &str, payload: ChannelPayload| SignalingEvent::ChannelMessage {
        peer: PeerKey::media("P1"),
        label: label.to_string(),
        payload,
    };

    call.hub.dispatch(&message("status", ChannelPayload::Speaking));
    assert_eq!(participant.speaking(), TriState::True);

    call.hub.dispatch(&message("JanusDataChannel", ChannelPayload::StoppedSpeaking));
    assert_eq!(participant.speaking(), TriState::False);

    call.hub.dispatch(&message("other", ChannelPayload::Speaking));
    assert_eq!(participant.speaking(), TriState::False);

    call.hub.dispatch(&message("status", ChannelPayload::Other));
    assert_eq!(participant.speaking(), TriState::False);
}

#[test]
fn nick_and_raised_hand_apply_before_any_peer_is_bound() {
    let call = Call::new();
    let participant = call.participant("P1");

    call.hub.dispatch(&SignalingEvent::Nick {
        id: "P1".to_string(),
        name: "Bob".to_string(),
    });
    call.hub.dispatch(&SignalingEvent::Nick {
        id: "P2".to_string(),
        name: "Eve".to_string(),
    });
    assert_eq!(participant.name(), Some("Bob".to_string()));

    call.hub.dispatch(&SignalingEvent::Nick {
        id: "P1".to_string(),
        name: String::new(),
    });
    assert_eq!(participant.name(), None);

    let raised = RaisedHand {
        state: true,
        timestamp: Some(1714557600000),
    };
    call.hub.dispatch(&SignalingEvent::RaisedHand {
        id: "P1".to_string(),
        raised,
    });
    assert_eq!(participant.raised_hand(), raised);
}

#[test]
fn change_subscribers_receive_owner_and_value() {
    let call = Call::new();
    let participant = call.participant("P1");
    let seen = Rc::new(RefCell::new(Vec::new()));

    let sink = seen.clone();
    let id = participant.on(StoreEvent::Change(ParticipantAttribute::Name), move |owner, value| {
        sink.borrow_mut().push((owner.peer_id().to_string(), value.clone()));
    });

    participant.on_nick("P1", "Alice");
    assert!(participant.off(StoreEvent::Change(ParticipantAttribute::Name), id));
    assert!(!participant.off(StoreEvent::Change(ParticipantAttribute::Name), id));
    participant.on_nick("P1", "Bob");

    assert_eq!(
        *seen.borrow(),
        vec![(
            "P1".to_string(),
            ParticipantValue::Text(Some("Alice".to_string()))
        )]
    );
    assert_eq!(
        participant.get(ParticipantAttribute::Name),
        ParticipantValue::Text(Some("Bob".to_string()))
    );
}

#[test]
fn rebinding_moves_the_state_subscription() {
    let call = Call::new();
    let participant = call.participant("P1");
    let first = call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    assert_eq!(first.state_subscriber_count(), 1);

    participant.unbind(PeerSlot::Media);
    assert_eq!(first.state_subscriber_count(), 0);
    assert_eq!(participant.connection_state(), ConnectionState::Completed);

    first.set_ice_connection_state("failed");
    assert_eq!(participant.connection_state(), ConnectionState::Completed);
}

#[test]
fn mismatched_peer_is_bound_anyway() {
    let call = Call::new();
    let participant = call.participant("P1");
    call.media_peer("P9", None);

    participant.bind(PeerSlot::Media, Some(PeerKey::media("P9")));

    assert_eq!(participant.media_peer(), Some(PeerKey::media("P9")));
}

#[test]
fn simulcast_quality_requires_simulcast_support() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));

    participant.set_simulcast_quality(PeerSlot::Media, SimulcastQuality::Low);
    assert_eq!(peer.selected_simulcast_stream(), None);

    peer.set_simulcast_enabled(true);
    participant.set_simulcast_quality(PeerSlot::Media, SimulcastQuality::Medium);
    assert_eq!(
        peer.selected_simulcast_stream(),
        Some((SimulcastQuality::Medium, SimulcastQuality::Medium))
    );

    // Nothing bound to the screen slot.
    participant.set_simulcast_quality(PeerSlot::Screen, SimulcastQuality::Low);
    assert_eq!(
        peer.selected_simulcast_stream(),
        Some((SimulcastQuality::Medium, SimulcastQuality::Medium))
    );
}

#[test]
fn destroy_detaches_from_everything_once() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    assert_eq!(call.hub.subscriber_count(SignalingEventKind::Mute), 1);

    participant.destroy();
    let after_first = participant.attributes();

    assert!(!call.hub.has_subscribers());
    assert_eq!(peer.state_subscriber_count(), 0);
    assert_eq!(call.output.attached(), 0);
    assert_eq!(participant.stream(), None);

    participant.destroy();
    assert_eq!(participant.attributes(), after_first);

    call.unmute("P1", TrackKind::Audio);
    peer.set_ice_connection_state("connected");
    assert_eq!(participant.attributes(), after_first);
}

#[test]
fn handlers_may_read_the_model_while_it_changes() {
    let call = Call::new();
    let participant = call.participant("P1");
    let seen = Rc::new(RefCell::new(None));

    let sink = seen.clone();
    participant.on(
        StoreEvent::Change(ParticipantAttribute::ConnectionState),
        move |owner, _| {
            *sink.borrow_mut() = Some((owner.connection_state(), owner.audio_available()));
        },
    );

    participant.bind(PeerSlot::Media, None);

    // Media state is written after the connection state.
    assert_eq!(
        *seen.borrow(),
        Some((ConnectionState::Completed, TriState::Unknown))
    );
}

#[test]
fn unbinding_the_media_peer_releases_its_stream() {
    let call = Call::new();
    let participant = call.participant("P1");
    call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    assert_eq!(call.output.attached(), 1);

    participant.unbind(PeerSlot::Media);

    assert_eq!(call.output.attached(), 0);
    assert_eq!(participant.stream(), None);
    assert_eq!(participant.connection_state(), ConnectionState::Completed);
    assert_eq!(participant.audio_available(), TriState::False);
}

#[test]
fn each_reported_state_has_exactly_its_side_effects() {
    for state in ConnectionState::iter() {
        let call = Call::new();
        let participant = call.participant("P1");
        let peer = call.media_peer("P1", Some("s1"));
        participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));

        call.unmute("P1", TrackKind::Audio);
        call.unmute("P1", TrackKind::Video);
        call.hub.dispatch(&SignalingEvent::ChannelMessage {
            peer: PeerKey::media("P1"),
            label: "status".to_string(),
            payload: ChannelPayload::Speaking,
        });
        participant.on_nick("P1", "Bob");
        peer.set_nick(Some("Alice".to_string()));

        peer.set_ice_connection_state(state.to_string());

        let (media, name) = match state {
            ConnectionState::New | ConnectionState::Checking => (TriState::Unknown, "Bob"),
            ConnectionState::Connected | ConnectionState::Completed => (TriState::True, "Alice"),
            _ => (TriState::True, "Bob"),
        };
        assert_eq!(participant.connection_state(), state, "{state}");
        assert_eq!(participant.audio_available(), media, "{state}");
        assert_eq!(participant.speaking(), media, "{state}");
        assert_eq!(participant.video_available(), media, "{state}");
        assert_eq!(participant.name(), Some(name.to_string()), "{state}");
        assert_eq!(participant.stream(), Some(MediaStream::new("s1")), "{state}");
    }
}

#[test]
fn rebinding_to_another_peer_drops_the_old_state_listener() {
    let call = Call::new();
    let participant = call.participant("P1");
    let first = call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    first.set_ice_connection_state("connected");

    let second = call.peers.insert(PeerKey::media("P1-restarted"));
    second.set_stream(Some(MediaStream::new("s2")));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1-restarted")));

    assert_eq!(first.state_subscriber_count(), 0);
    assert_eq!(second.state_subscriber_count(), 1);
    assert_eq!(participant.connection_state(), ConnectionState::New);
    assert_eq!(participant.stream(), Some(MediaStream::new("s2")));
    assert_eq!(call.output.attached(), 1);

    first.set_ice_connection_state("failed");
    assert_eq!(participant.connection_state(), ConnectionState::New);

    second.set_ice_connection_state("connected");
    assert_eq!(participant.connection_state(), ConnectionState::Connected);
}

#[test]
fn peer_bound_before_the_transport_knows_it_is_attached_on_its_stream() {
    let call = Call::new();
    let participant = call.participant("P1");

    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    assert_eq!(participant.media_peer(), Some(PeerKey::media("P1")));
    assert_eq!(participant.connection_state(), ConnectionState::New);
    assert!(!participant.has_audio_sink());

    let peer = call.media_peer("P1", Some("s1"));
    peer.set_nick(Some("Alice".to_string()));
    call.hub.dispatch(&SignalingEvent::PeerStreamAdded {
        peer: PeerKey::media("P1"),
    });
    assert_eq!(peer.state_subscriber_count(), 1);
    assert_eq!(participant.stream(), Some(MediaStream::new("s1")));
    assert_eq!(call.output.attached(), 1);

    peer.set_ice_connection_state("connected");
    assert_eq!(participant.connection_state(), ConnectionState::Connected);
    assert_eq!(participant.name(), Some("Alice".to_string()));

    // A renewed stream does not subscribe twice.
    call.hub.dispatch(&SignalingEvent::PeerStreamAdded {
        peer: PeerKey::media("P1"),
    });
    assert_eq!(peer.state_subscriber_count(), 1);
    assert_eq!(call.output.attached(), 1);
    assert_eq!(participant.connection_state(), ConnectionState::Connected);
}

#[test]
fn binding_an_unknown_peer_releases_the_previous_one() {
    let call = Call::new();
    let participant = call.participant("P1");
    let peer = call.media_peer("P1", Some("s1"));
    participant.bind(PeerSlot::Media, Some(PeerKey::media("P1")));
    peer.set_ice_connection_state("connected");
    call.unmute("P1", TrackKind::Audio);

    participant.bind(PeerSlot::Media, Some(PeerKey::media("ghost")));

    assert_eq!(participant.media_peer(), Some(PeerKey::media("ghost")));
    assert_eq!(participant.stream(), None);
    assert_eq!(call.output.attached(), 0);
    assert_eq!(participant.connection_state(), ConnectionState::New);
    assert_eq!(participant.audio_available(), TriState::Unknown);
    assert_eq!(peer.state_subscriber_count(), 0);

    peer.set_ice_connection_state("failed");
    assert_eq!(participant.connection_state(), ConnectionState::New);
}
