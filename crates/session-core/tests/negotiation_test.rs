//! Offer/answer negotiation, ICE candidate ordering and glare handling

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use telecare_session_core::{
    ChannelMessage, DataChannelLink, Delivery, LinkEvent, LinkState, ParticipantId, ParticipantRole, SessionEvent,
    SignalingPhase,
};
use telecare_signaling::{SignalKind, SignalingMessage};

use common::*;

fn is_connected_event(event: &SessionEvent, who: &str) -> bool {
    matches!(event, SessionEvent::ParticipantConnected { participant_id } if participant_id.as_str() == who)
}

fn is_failed_event(event: &SessionEvent, who: &str) -> bool {
    matches!(event, SessionEvent::PeerFailed { participant_id, .. } if participant_id.as_str() == who)
}

#[tokio::test]
async fn test_joiner_gets_exactly_one_offer_and_connects() {
    let mut h = start("alice").await;

    let link = h.connect_peer("bob").await;

    assert_eq!(h.socket.sent_to(SignalKind::Offer, "bob").len(), 1);
    assert_eq!(link.offers.load(Ordering::SeqCst), 1);
    assert_eq!(link.channel().label(), "consultation");

    // Our candidate is only trickled after the offer went out
    let sent = h.socket.sent_messages();
    let offer_at = sent.iter().position(|m| m.kind == SignalKind::Offer).unwrap();
    let candidate_at = sent.iter().position(|m| m.kind == SignalKind::IceCandidate).unwrap();
    assert!(offer_at < candidate_at);
    assert_eq!(sent[candidate_at].to.as_deref(), Some("bob"));

    let session = h.session.clone();
    eventually(move || {
        let session = session.clone();
        async move { session.is_connected() }
    })
    .await;

    let participants = h.session.participants().await.unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].participant_id.as_str(), "bob");
    assert_eq!(participants[0].role, ParticipantRole::Patient);
    assert_eq!(participants[0].phase, SignalingPhase::Connected);
    assert!(participants[0].connected);
}

#[tokio::test]
async fn test_early_candidates_are_applied_once_after_answer() {
    let mut h = start("alice").await;

    h.socket.inject(joined("bob")).await;
    h.sent(SignalKind::Offer, "bob", 1).await;

    h.socket.inject(candidate("bob", "alice", 1)).await;
    h.socket.inject(candidate("bob", "alice", 2)).await;
    h.socket.inject(answer("bob", "alice")).await;
    h.wait_for(|e| is_connected_event(e, "bob")).await;

    let link = h.links.latest("bob");
    let applied = link.clone();
    eventually(move || {
        let applied = applied.clone();
        async move { applied.candidates.lock().unwrap().len() == 2 }
    })
    .await;

    let candidates: Vec<String> = link.candidates.lock().unwrap().iter().map(|c| c.candidate.clone()).collect();
    assert!(candidates[0].starts_with("candidate:1 "));
    assert!(candidates[1].starts_with("candidate:2 "));

    // Later candidates go straight to the link
    h.socket.inject(candidate("bob", "alice", 3)).await;
    let applied = link.clone();
    eventually(move || {
        let applied = applied.clone();
        async move { applied.candidates.lock().unwrap().len() == 3 }
    })
    .await;
}

#[tokio::test]
async fn test_glare_smaller_id_keeps_its_offer() {
    let mut h = start("alice").await;

    h.socket.inject(joined("bob")).await;
    h.sent(SignalKind::Offer, "bob", 1).await;

    // bob offers too; "alice" < "bob" so ours stands
    h.socket.inject(offer("bob", "alice")).await;
    h.socket.inject(answer("bob", "alice")).await;
    h.socket.inject(candidate("bob", "alice", 1)).await;
    h.wait_for(|e| is_connected_event(e, "bob")).await;

    let links = h.links.links_for("bob");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].answers.load(Ordering::SeqCst), 0);
    assert!(h.socket.sent_to(SignalKind::Answer, "bob").is_empty());
}

#[tokio::test]
async fn test_kept_offer_discards_candidates_of_losing_offer() {
    let mut h = start("alice").await;

    h.socket.inject(joined("bob")).await;
    h.sent(SignalKind::Offer, "bob", 1).await;

    // Candidate 1 belongs to bob's offer, which loses the glare
    h.socket.inject(candidate("bob", "alice", 1)).await;
    h.socket.inject(offer("bob", "alice")).await;
    h.socket.inject(answer("bob", "alice")).await;
    h.socket.inject(candidate("bob", "alice", 2)).await;
    h.wait_for(|e| is_connected_event(e, "bob")).await;

    let link = h.links.latest("bob");
    let applied = link.clone();
    eventually(move || {
        let applied = applied.clone();
        async move { applied.candidates.lock().unwrap().iter().any(|c| c.candidate.starts_with("candidate:2 ")) }
    })
    .await;

    let candidates = link.candidates.lock().unwrap().clone();
    assert_eq!(candidates.len(), 1, "stale candidates applied: {:?}", candidates);
}

#[tokio::test]
async fn test_glare_larger_id_yields_and_answers() {
    let mut h = start("zoe").await;

    h.socket.inject(joined("bob")).await;
    h.sent(SignalKind::Offer, "bob", 1).await;

    h.socket.inject(offer("bob", "zoe")).await;
    h.sent(SignalKind::Answer, "bob", 1).await;

    let links = h.links.links_for("bob");
    assert_eq!(links.len(), 2);
    assert!(links[0].is_closed(), "the pending offering link must be replaced");
    assert!(!links[1].is_closed());
    assert_eq!(links[1].offers.load(Ordering::SeqCst), 0);
    assert_eq!(links[1].answers.load(Ordering::SeqCst), 1);

    h.socket.inject(candidate("bob", "zoe", 1)).await;
    h.wait_for(|e| is_connected_event(e, "bob")).await;
    assert_eq!(h.socket.sent_to(SignalKind::Answer, "bob").len(), 1);
}

#[tokio::test]
async fn test_answering_side_accepts_remote_data_channel() {
    let mut h = start("alice").await;

    // bob was here first and offers without us seeing a join
    h.socket.inject(offer("bob", "alice")).await;
    let joined = h.wait_for(|e| matches!(e, SessionEvent::ParticipantJoined { .. })).await;
    match joined {
        SessionEvent::ParticipantJoined { participant_id, role } => {
            assert_eq!(participant_id.as_str(), "bob");
            assert_eq!(role, ParticipantRole::Unknown);
        }
        other => panic!("unexpected event {:?}", other),
    }

    h.sent(SignalKind::Answer, "bob", 1).await;
    h.socket.inject(candidate("bob", "alice", 4)).await;
    h.wait_for(|e| is_connected_event(e, "bob")).await;

    let link = h.links.latest("bob");
    let channel = Arc::new(FakeChannel::new("consultation"));
    link.emit(LinkEvent::DataChannel(channel.clone())).await;

    // A channel with a foreign label is not ours
    link.emit(LinkEvent::DataChannel(Arc::new(FakeChannel::new("telemetry")))).await;

    let delivery = h.session.send_message_to("bob", "Can you hear me?").await.unwrap();
    assert_eq!(delivery, Delivery::Sent);

    let sent = channel.sent_texts();
    assert_eq!(sent.len(), 1);
    match ChannelMessage::decode(&sent[0]) {
        Some(ChannelMessage::Text(text)) => {
            assert_eq!(text.content, "Can you hear me?");
            assert_eq!(text.sender, "alice");
        }
        other => panic!("unexpected frame {:?}", other),
    }
}

#[tokio::test]
async fn test_offer_on_connected_link_fails_only_that_participant() {
    let mut h = start("alice").await;
    let bob = h.connect_peer("bob").await;
    let carol = h.connect_peer("carol").await;

    h.socket.inject(offer("bob", "alice")).await;
    let failed = h.wait_for(|e| is_failed_event(e, "bob")).await;
    if let SessionEvent::PeerFailed { reason, .. } = failed {
        assert!(reason.contains("renegotiation"), "reason: {}", reason);
    }

    assert!(bob.is_closed());
    assert!(!carol.is_closed());
    assert!(h.session.is_connected());

    let participants = h.session.participants().await.unwrap();
    let phase_of = |id: &str| participants.iter().find(|p| p.participant_id.as_str() == id).unwrap().phase;
    assert_eq!(phase_of("bob"), SignalingPhase::Closed);
    assert_eq!(phase_of("carol"), SignalingPhase::Connected);
}

#[tokio::test]
async fn test_link_failure_is_isolated() {
    let mut h = start("alice").await;
    let bob = h.connect_peer("bob").await;
    let carol = h.connect_peer("carol").await;

    bob.emit(LinkEvent::StateChanged(LinkState::Failed)).await;
    h.wait_for(|e| is_failed_event(e, "bob")).await;

    assert!(bob.is_closed());
    assert!(!carol.is_closed());

    // Events from the dead link are ignored
    bob.emit(LinkEvent::StateChanged(LinkState::Connected)).await;
    let participants = h.session.participants().await.unwrap();
    let bob_info = participants.iter().find(|p| p.participant_id.as_str() == "bob").unwrap();
    assert!(!bob_info.connected);
    assert_eq!(bob_info.phase, SignalingPhase::Closed);
}

#[tokio::test]
async fn test_rejoin_starts_from_fresh_state() {
    let mut h = start("alice").await;
    let first = h.connect_peer("bob").await;

    h.socket.inject(joined("bob")).await;
    h.sent(SignalKind::Offer, "bob", 2).await;

    assert!(first.is_closed());
    let links = h.links.links_for("bob");
    assert_eq!(links.len(), 2);
    assert_eq!(links[1].offers.load(Ordering::SeqCst), 1);

    let participants = h.session.participants().await.unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].phase, SignalingPhase::OfferSent);
    assert!(!participants[0].connected);

    // The new link negotiates normally
    h.socket.inject(answer("bob", "alice")).await;
    h.socket.inject(candidate("bob", "alice", 9)).await;
    h.wait_for(|e| is_connected_event(e, "bob")).await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_offer_times_out() {
    let mut h = start("alice").await;

    h.socket.inject(joined("bob")).await;
    h.sent(SignalKind::Offer, "bob", 1).await;

    // Nobody answers; the clock runs forward to the negotiation timeout
    let failed = h.wait_for(|e| is_failed_event(e, "bob")).await;
    if let SessionEvent::PeerFailed { reason, .. } = failed {
        assert!(reason.contains("timed out"), "reason: {}", reason);
    }

    assert!(h.links.latest("bob").is_closed());
    let participants = h.session.participants().await.unwrap();
    assert_eq!(participants[0].phase, SignalingPhase::Closed);
    assert!(!h.session.is_connected());
}

#[tokio::test]
async fn test_foreign_and_misaddressed_frames_are_ignored() {
    let mut h = start("alice").await;

    h.socket.inject(SignalingMessage::user_joined("other-session", "mallory", None)).await;
    h.socket.inject(joined("alice")).await;
    h.socket.inject(offer("bob", "carol")).await;
    h.socket.inject_raw(r#"{"type":"user-joined","sessionId":"consult-1"}"#.to_string()).await;

    // Processed in order, so once dave has an offer the others were seen
    h.socket.inject(joined("dave")).await;
    h.sent(SignalKind::Offer, "dave", 1).await;

    assert_eq!(h.links.count(), 1);
    assert_eq!(h.socket.count(SignalKind::Offer), 1);
    assert_eq!(h.socket.count(SignalKind::Answer), 0);
    let participants = h.session.participants().await.unwrap();
    assert_eq!(
        participants.iter().map(|p| p.participant_id.clone()).collect::<Vec<_>>(),
        vec![ParticipantId::from("dave")]
    );
}

#[tokio::test]
async fn test_user_left_removes_participant() {
    let mut h = start("alice").await;
    let bob = h.connect_peer("bob").await;

    h.socket.inject(SignalingMessage::user_left(SESSION, "bob")).await;
    h.wait_for(|e| matches!(e, SessionEvent::ParticipantLeft { participant_id } if participant_id.as_str() == "bob"))
        .await;

    assert!(bob.is_closed());
    assert!(h.session.participants().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_end_call_closes_link_still_being_set_up() {
    let harness = HarnessBuilder::new("alice");
    harness.links().slow_setup(Some(Duration::from_secs(30)));
    let mut h = harness.start().await;

    h.socket.inject(joined("bob")).await;
    h.links.created(1).await;

    h.session.end_call().await.expect("end_call failed");

    let link = h.links.latest("bob");
    let closed = link.clone();
    eventually(move || {
        let closed = closed.clone();
        async move { closed.is_closed() }
    })
    .await;
    assert!(h.socket.sent_to(SignalKind::Offer, "bob").is_empty());
    assert!(link.tracks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejoin_during_setup_closes_the_pending_link() {
    let harness = HarnessBuilder::new("alice");
    harness.links().slow_setup(Some(Duration::from_secs(30)));
    let mut h = harness.start().await;

    h.socket.inject(joined("bob")).await;
    h.links.created(1).await;

    h.links.slow_setup(None);
    h.socket.inject(joined("bob")).await;
    h.sent(SignalKind::Offer, "bob", 1).await;

    let links = h.links.links_for("bob");
    assert_eq!(links.len(), 2);
    let stale = links[0].clone();
    eventually(move || {
        let stale = stale.clone();
        async move { stale.is_closed() }
    })
    .await;
    assert_eq!(links[0].offers.load(Ordering::SeqCst), 0);
    assert!(!links[1].is_closed());

    h.socket.inject(answer("bob", "alice")).await;
    h.socket.inject(candidate("bob", "alice", 3)).await;
    h.wait_for(|e| is_connected_event(e, "bob")).await;

    // Nothing left open once the call ends
    h.session.end_call().await.expect("end_call failed");
    assert!(h.links.links_for("bob").iter().all(|link| link.is_closed()));
}

#[tokio::test]
async fn test_answer_and_candidate_from_strangers_are_dropped() {
    let mut h = start("alice").await;

    // mallory never joined, so neither frame creates a participant
    h.socket.inject(answer("mallory", "alice")).await;
    h.socket.inject(candidate("mallory", "alice", 5)).await;
    h.socket.inject(joined("dave")).await;
    h.sent(SignalKind::Offer, "dave", 1).await;

    h.socket.inject(answer("dave", "alice")).await;
    h.socket.inject(candidate("dave", "alice", 6)).await;
    h.wait_for(|e| is_connected_event(e, "dave")).await;

    assert_eq!(h.links.count(), 1);
    let participants = h.session.participants().await.unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].participant_id.as_str(), "dave");
    assert_eq!(participants[0].phase, SignalingPhase::Connected);
}
