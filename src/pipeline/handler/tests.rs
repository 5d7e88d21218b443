#![cfg(test)]

use super::*;
use crate::{
    crypto,
    error::RequestError,
    node_info::LocalNode,
    node_store::{MemoryNodeStore, NodeStore},
    packet::{self, AuthHeader, AuthResponse, Packet},
    pipeline::{Envelope, Field, FieldValue, PipelineBuilder},
    rpc::Message,
    scheduler::Scheduler,
    session::{
        HandshakeContinuation, NodeSession, RequestOutcome, RequestResult, SessionStatus,
        TaskOptions, TaskType,
    },
    transport::{ChannelTransport, Datagram},
    Discv5Config, Discv5ConfigBuilder, Enr, TokioExecutor,
};
use enr::{CombinedKey, EnrBuilder, NodeId};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};

fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A node whose pipelines are run by hand, one envelope at a time.
struct TestNode {
    enr: Enr,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    store: Arc<MemoryNodeStore>,
    outgoing: mpsc::UnboundedReceiver<Envelope>,
    wire: mpsc::UnboundedReceiver<Datagram>,
    inbound: Vec<Box<dyn EnvelopeHandler>>,
    outbound: Vec<Box<dyn EnvelopeHandler>>,
}

impl TestNode {
    fn new(port: u16) -> Self {
        // timers of the next-task driver are replaced by explicit pushes
        Self::with_config(
            port,
            Discv5ConfigBuilder::new()
                .next_task_delay(Duration::from_secs(60))
                .build(),
        )
    }

    fn with_config(port: u16, config: Discv5Config) -> Self {
        let key = CombinedKey::generate_secp256k1();
        let enr = EnrBuilder::new("v4")
            .ip4(Ipv4Addr::LOCALHOST)
            .udp4(port)
            .build(&key)
            .unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

        let builder = PipelineBuilder::new("outgoing");
        let store = Arc::new(MemoryNodeStore::new());
        let local = Arc::new(LocalNode::new(enr.clone(), key).unwrap());
        let registry = Arc::new(SessionRegistry::new(
            local,
            config,
            Scheduler::new(Box::new(TokioExecutor::default())),
            builder.pipeline(),
            store.clone(),
        ));
        let (transport, wire) = ChannelTransport::new(addr);

        TestNode {
            enr,
            addr,
            inbound: inbound_handlers(&registry),
            outbound: outbound_handlers(&registry, Arc::new(transport)),
            registry,
            store,
            outgoing: builder.receiver,
            wire,
        }
    }

    fn key(&self) -> &CombinedKey {
        self.registry.local().key()
    }

    fn request(
        &mut self,
        to: &Enr,
        task: TaskType,
        options: TaskOptions,
    ) -> oneshot::Receiver<RequestResult> {
        let (completion, receiver) = oneshot::channel();
        let mut envelope = Envelope::new();
        envelope.put(Field::Node, FieldValue::Node(to.clone()));
        envelope.put(Field::Task, FieldValue::Task(task));
        envelope.put(Field::TaskOptions, FieldValue::TaskOptions(options));
        envelope.put(Field::Completion, FieldValue::Completion(completion));
        self.run_outbound(envelope);
        receiver
    }

    fn run_outbound(&mut self, mut envelope: Envelope) -> Envelope {
        for handler in self.outbound.iter_mut() {
            handler.handle(&mut envelope);
        }
        envelope
    }

    /// Runs the queued outbound envelopes and returns the packets that reached the wire.
    fn flush(&mut self) -> Vec<Datagram> {
        while let Ok(envelope) = self.outgoing.try_recv() {
            self.run_outbound(envelope);
        }
        let mut sent = Vec::new();
        while let Ok(datagram) = self.wire.try_recv() {
            sent.push(datagram);
        }
        sent
    }

    fn receive(&mut self, packet: Packet, src: SocketAddr) -> Envelope {
        let mut envelope = Envelope::new();
        envelope.put(Field::IncomingPacket, FieldValue::Packet(packet));
        envelope.put(Field::Remote, FieldValue::Remote(src));
        for handler in self.inbound.iter_mut() {
            handler.handle(&mut envelope);
        }
        envelope
    }

    fn session_of(&self, other: &TestNode) -> Arc<NodeSession> {
        self.registry.get(&other.enr.node_id()).unwrap()
    }
}

/// Exchanges packets between two nodes until both are quiet. Returns every packet exchanged.
fn settle(a: &mut TestNode, b: &mut TestNode) -> Vec<Datagram> {
    let mut transcript = Vec::new();
    loop {
        let from_a = a.flush();
        for datagram in &from_a {
            b.receive(datagram.packet.clone(), datagram.src);
        }
        let from_b = b.flush();
        for datagram in &from_b {
            a.receive(datagram.packet.clone(), datagram.src);
        }
        if from_a.is_empty() && from_b.is_empty() {
            return transcript;
        }
        transcript.extend(from_a);
        transcript.extend(from_b);
    }
}

/// Runs a PING from `a` to `b` over a fresh pair of sessions.
fn handshake(a: &mut TestNode, b: &mut TestNode) {
    let b_enr = b.enr.clone();
    let mut pong = a.request(&b_enr, TaskType::Ping, TaskOptions::liveness());
    settle(a, b);
    assert!(matches!(pong.try_recv(), Ok(Ok(RequestOutcome::Pong { .. }))));
}

/// The packets `a` sends to open a handshake with `b`, up to the WHOAREYOU of `b`.
fn challenge(a: &mut TestNode, b: &mut TestNode) -> Packet {
    let random = a.flush().pop().unwrap();
    assert!(random.packet.is_random());
    b.receive(random.packet, a.addr);
    let whoareyou = b.flush().pop().unwrap();
    assert!(whoareyou.packet.is_whoareyou());
    whoareyou.packet
}

/// An auth-header packet from `a` to `b` answering `id_nonce`, with the signature `sign` makes.
fn forged_auth_packet(
    a: &TestNode,
    b: &TestNode,
    id_nonce: &packet::IdNonce,
    sign: impl FnOnce(&[u8]) -> Vec<u8>,
) -> Packet {
    let (a_id, b_id) = (a.enr.node_id(), b.enr.node_id());
    let (keys, ephem_pubkey) =
        crypto::generate_session_keys(&a_id, &b_id, &b.enr.public_key(), id_nonce).unwrap();
    let signature = sign(&ephem_pubkey);
    let response = AuthResponse::new(&signature, Some(a.enr.clone()));
    let auth_response = crypto::encrypt_auth_response(&keys.auth_resp_key, &response).unwrap();

    let tag = packet::tag(&a_id, &b_id);
    let auth_tag: packet::AuthTag = rand::random();
    let ping = Message::Ping {
        id: crate::rpc::RequestId::random(),
        enr_seq: a.enr.seq(),
    };
    let message =
        crypto::encrypt_message(&keys.initiator_key, auth_tag, &ping.encode(), &tag).unwrap();
    Packet::AuthMessage {
        tag,
        auth_header: AuthHeader::new(auth_tag, *id_nonce, ephem_pubkey, auth_response),
        message,
    }
}

#[tokio::test]
async fn ping_establishes_both_sessions() {
    init();
    let mut a = TestNode::new(9001);
    let mut b = TestNode::new(9002);

    let b_enr = b.enr.clone();
    let mut pong = a.request(&b_enr, TaskType::Ping, TaskOptions::liveness());
    assert_eq!(a.session_of(&b).status(), SessionStatus::RandomPacketSent);

    let transcript = settle(&mut a, &mut b);
    assert!(transcript[0].packet.is_random());
    assert!(transcript[1].packet.is_whoareyou());
    assert!(matches!(transcript[2].packet, Packet::AuthMessage { .. }));

    assert_eq!(
        pong.try_recv().unwrap(),
        Ok(RequestOutcome::Pong {
            enr_seq: b.enr.seq(),
            ip: a.addr.ip(),
            port: a.addr.port(),
        })
    );
    assert!(a.session_of(&b).is_authenticated());
    assert!(b.session_of(&a).is_authenticated());
    // the initiator announced its record in the auth-response
    assert_eq!(b.store.resolve(&a.enr.node_id()), Some(a.enr.clone()));
    assert!(a.store.last_seen(&b.enr.node_id()).is_some());
    assert_eq!(a.session_of(&b).pending_requests(), 0);
    // the PONG told a how b sees it
    assert_eq!(a.session_of(&b).reported_address(), Some(a.addr));
    assert_eq!(b.session_of(&a).reported_address(), None);
}

#[tokio::test]
async fn find_nodes_accumulates_every_nodes_message() {
    init();
    let mut a = TestNode::new(9011);
    let mut b = TestNode::new(9012);
    let b_id = b.enr.node_id();

    let mut far = 0;
    while far < 7 {
        let key = CombinedKey::generate_secp256k1();
        let enr = EnrBuilder::new("v4").build(&key).unwrap();
        if crypto::log_distance(&b_id, &enr.node_id()) == 256 {
            b.store.save(enr);
            far += 1;
        }
    }
    handshake(&mut a, &mut b);

    let b_enr = b.enr.clone();
    let mut nodes = a.request(&b_enr, TaskType::FindNode, TaskOptions::distance(256));
    let transcript = settle(&mut a, &mut b);
    let expected = b.store.nodes_at_distance(&b_id, 256, 16);
    // three records per NODES message
    let responses = (expected.len() + 2) / 3;
    assert_eq!(transcript.len(), 1 + responses);

    match nodes.try_recv().unwrap() {
        Ok(RequestOutcome::Nodes(found)) => {
            assert_eq!(found.len(), expected.len());
            for enr in found {
                assert_eq!(crypto::log_distance(&b_id, &enr.node_id()), 256);
                assert!(a.store.resolve(&enr.node_id()).is_some());
            }
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn find_nodes_drops_records_outside_the_distance() {
    init();
    let mut a = TestNode::new(9021);
    let mut b = TestNode::new(9022);
    let b_id = b.enr.node_id();
    handshake(&mut a, &mut b);

    let record_at = |distance: u64| loop {
        let key = CombinedKey::generate_secp256k1();
        let enr = EnrBuilder::new("v4").build(&key).unwrap();
        if crypto::log_distance(&b_id, &enr.node_id()) == distance {
            return enr;
        }
    };
    let near = record_at(255);
    let far = record_at(256);

    let b_enr = b.enr.clone();
    let mut nodes = a.request(&b_enr, TaskType::FindNode, TaskOptions::distance(255));
    // the request is sent but never answered by b itself
    assert_eq!(a.flush().len(), 1);
    let id = a.session_of(&b).first_sent_request().unwrap().id;

    let b_session = b.session_of(&a);
    b_session
        .send_message(&Message::Nodes {
            id: id.clone(),
            total: 2,
            nodes: vec![far.clone()],
        })
        .unwrap();
    b_session
        .send_message(&Message::Nodes {
            id,
            total: 2,
            nodes: vec![near.clone()],
        })
        .unwrap();

    let replies = b.flush();
    a.receive(replies[0].packet.clone(), b.addr);
    assert!(nodes.try_recv().is_err(), "waits for the second message");
    a.receive(replies[1].packet.clone(), b.addr);

    assert_eq!(
        nodes.try_recv().unwrap(),
        Ok(RequestOutcome::Nodes(vec![near]))
    );
    assert!(a.store.resolve(&far.node_id()).is_none());
}

#[tokio::test]
async fn corrupted_signatures_never_authenticate() {
    init();
    let mut a = TestNode::new(9031);
    let mut b = TestNode::new(9032);

    let b_enr = b.enr.clone();
    let mut pong = a.request(&b_enr, TaskType::Ping, TaskOptions::liveness());
    let whoareyou = challenge(&mut a, &mut b);
    let id_nonce = match &whoareyou {
        Packet::WhoAreYou { id_nonce, .. } => *id_nonce,
        _ => unreachable!(),
    };

    for i in 0..100 {
        let forged = forged_auth_packet(&a, &b, &id_nonce, |ephem| {
            let mut signature = crypto::sign_nonce(a.key(), &id_nonce, ephem).unwrap();
            signature[i % 64] ^= 1u8 << (i % 8);
            signature
        });
        let envelope = b.receive(forged, a.addr);
        assert!(envelope.is_bad());
        let session = b.session_of(&a);
        assert_eq!(session.status(), SessionStatus::WhoAreYouSent);
        assert!(!session.has_keys());
    }

    // a valid signature of another identity is no better
    let impostor = CombinedKey::generate_secp256k1();
    let forged = forged_auth_packet(&a, &b, &id_nonce, |ephem| {
        crypto::sign_nonce(&impostor, &id_nonce, ephem).unwrap()
    });
    assert!(b.receive(forged, a.addr).is_bad());
    assert!(!b.session_of(&a).has_keys());

    // the genuine answer still completes the handshake
    a.receive(whoareyou, b.addr);
    settle(&mut a, &mut b);
    assert!(b.session_of(&a).is_authenticated());
    assert!(matches!(pong.try_recv(), Ok(Ok(RequestOutcome::Pong { .. }))));
}

#[tokio::test]
async fn auth_header_for_another_challenge_is_rejected() {
    init();
    let mut a = TestNode::new(9041);
    let mut b = TestNode::new(9042);

    let b_enr = b.enr.clone();
    let _pong = a.request(&b_enr, TaskType::Ping, TaskOptions::liveness());
    challenge(&mut a, &mut b);

    let stale_nonce: packet::IdNonce = rand::random();
    let forged = forged_auth_packet(&a, &b, &stale_nonce, |ephem| {
        crypto::sign_nonce(a.key(), &stale_nonce, ephem).unwrap()
    });
    assert!(b.receive(forged, a.addr).is_bad());
    assert!(!b.session_of(&a).is_authenticated());
}

#[tokio::test]
async fn undecryptable_message_leaves_the_session_alone() {
    init();
    let mut a = TestNode::new(9051);
    let mut b = TestNode::new(9052);
    handshake(&mut a, &mut b);

    let garbage = Packet::Message {
        tag: packet::tag(&b.enr.node_id(), &a.enr.node_id()),
        auth_tag: rand::random(),
        message: vec![0xab; 40],
    };
    let envelope = a.receive(garbage, b.addr);
    assert!(envelope.is_bad());
    assert!(!envelope.contains(Field::Message));
    assert!(a.session_of(&b).is_authenticated());
    assert!(a.flush().is_empty());
}

#[tokio::test]
async fn whoareyou_must_be_addressed_to_us_and_answer_our_packet() {
    init();
    let mut a = TestNode::new(9061);
    let b = TestNode::new(9062);

    let someone_else = NodeId::random();
    let misaddressed = Packet::whoareyou(&someone_else, 0, rand::random(), rand::random());
    assert!(a.receive(misaddressed, b.addr).is_bad());

    let unsolicited = Packet::whoareyou(&a.enr.node_id(), 0, rand::random(), rand::random());
    let envelope = a.receive(unsolicited, b.addr);
    assert!(envelope.is_bad());
    assert!(!envelope.contains(Field::Session));
    assert!(a.registry.is_empty());
}

#[tokio::test]
async fn simultaneous_contact_is_challenged_by_the_lower_node_id() {
    init();
    let mut a = TestNode::new(9071);
    let mut b = TestNode::new(9072);

    let (a_enr, b_enr) = (a.enr.clone(), b.enr.clone());
    let mut from_a = a.request(&b_enr, TaskType::Ping, TaskOptions::liveness());
    let mut from_b = b.request(&a_enr, TaskType::Ping, TaskOptions::liveness());

    let transcript = settle(&mut a, &mut b);
    let challengers: Vec<SocketAddr> = transcript
        .iter()
        .filter(|d| d.packet.is_whoareyou())
        .map(|d| d.src)
        .collect();
    let lower = if a.enr.node_id().raw() < b.enr.node_id().raw() {
        a.addr
    } else {
        b.addr
    };
    assert_eq!(challengers, vec![lower]);

    // the challenger's own request waits for its next-task run
    a.session_of(&b).push_next_task();
    b.session_of(&a).push_next_task();
    settle(&mut a, &mut b);

    assert!(matches!(from_a.try_recv(), Ok(Ok(RequestOutcome::Pong { .. }))));
    assert!(matches!(from_b.try_recv(), Ok(Ok(RequestOutcome::Pong { .. }))));
    assert!(a.session_of(&b).is_authenticated());
    assert!(b.session_of(&a).is_authenticated());
}

#[tokio::test]
async fn captured_auth_packet_is_delivered_later() {
    init();
    let mut a = TestNode::new(9081);
    let mut b = TestNode::new(9082);

    let b_enr = b.enr.clone();
    let mut capture = a.request(
        &b_enr,
        TaskType::Handshake,
        TaskOptions::handshake(HandshakeContinuation::Capture),
    );
    let whoareyou = challenge(&mut a, &mut b);
    a.receive(whoareyou, b.addr);
    // the auth-header is handed out, not sent
    assert!(a.flush().is_empty());
    let packet = match capture.try_recv().unwrap() {
        Ok(RequestOutcome::AuthPacket(packet)) => *packet,
        other => panic!("unexpected result {:?}", other),
    };
    assert!(matches!(packet, Packet::AuthMessage { .. }));
    assert!(!b.session_of(&a).is_authenticated());

    let mut deliver = a.request(
        &b_enr,
        TaskType::Handshake,
        TaskOptions::handshake(HandshakeContinuation::Deliver(Box::new(packet))),
    );
    settle(&mut a, &mut b);
    assert_eq!(deliver.try_recv().unwrap(), Ok(RequestOutcome::Established));
    assert!(a.session_of(&b).is_authenticated());
    assert!(b.session_of(&a).is_authenticated());

    // capturing on an established session is refused
    let mut late = a.request(
        &b_enr,
        TaskType::Handshake,
        TaskOptions::handshake(HandshakeContinuation::Capture),
    );
    assert_eq!(
        late.try_recv().unwrap(),
        Err(RequestError::AlreadyEstablished)
    );
}

#[tokio::test]
async fn whoareyou_for_an_established_session_resets_it() {
    init();
    let mut a = TestNode::new(9091);
    let mut b = TestNode::new(9092);
    handshake(&mut a, &mut b);

    let b_enr = b.enr.clone();
    let mut pending = a.request(&b_enr, TaskType::Ping, TaskOptions::liveness());
    assert_eq!(a.flush().len(), 1);

    let auth_tag = a
        .registry
        .auth_tags()
        .tag_of(a.session_of(&b).address())
        .unwrap();
    let whoareyou = Packet::whoareyou(&a.enr.node_id(), 0, auth_tag, rand::random());
    a.receive(whoareyou, b.addr);

    assert!(a.registry.get(&b.enr.node_id()).is_none());
    assert_eq!(pending.try_recv().unwrap(), Err(RequestError::SessionReset));
}

#[tokio::test]
async fn random_packet_for_an_established_session_starts_over() {
    init();
    let mut a = TestNode::new(9101);
    let mut b = TestNode::new(9102);
    handshake(&mut a, &mut b);
    let before = a.session_of(&b);

    let random = Packet::random(packet::tag(&b.enr.node_id(), &a.enr.node_id()));
    let envelope = a.receive(random, b.addr);
    assert!(!envelope.is_bad());

    let after = a.session_of(&b);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.status(), SessionStatus::WhoAreYouSent);
    let sent = a.flush();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].packet.is_whoareyou());
}

#[tokio::test]
async fn request_to_an_unreachable_record_fails() {
    init();
    let mut a = TestNode::new(9111);
    let key = CombinedKey::generate_secp256k1();
    let bare = EnrBuilder::new("v4").build(&key).unwrap();

    let mut result = a.request(&bare, TaskType::Ping, TaskOptions::liveness());
    assert!(matches!(
        result.try_recv().unwrap(),
        Err(RequestError::InvalidEnr(_))
    ));
    assert!(a.registry.is_empty());
    assert!(a.flush().is_empty());
}

#[tokio::test]
async fn a_message_from_another_address_leaves_the_session_alone() {
    init();
    let mut a = TestNode::new(9121);
    let mut b = TestNode::new(9122);
    handshake(&mut a, &mut b);

    let b_enr = b.enr.clone();
    let mut pong = a.request(&b_enr, TaskType::Ping, TaskOptions::liveness());
    let ping = a.flush();
    assert_eq!(ping.len(), 1);

    let spoofed: SocketAddr = "10.0.0.9:30303".parse().unwrap();
    let garbage = Packet::Message {
        tag: packet::tag(&b.enr.node_id(), &a.enr.node_id()),
        auth_tag: rand::random(),
        message: vec![0; 40],
    };
    a.receive(garbage, spoofed);

    let session = a.session_of(&b);
    assert_eq!(session.address().socket_addr, b.addr);
    assert!(session.is_authenticated());
    assert_eq!(session.pending_requests(), 1);
    assert!(pong.try_recv().is_err());
    // only the sender of the garbage is challenged
    let challenge = a.flush();
    assert_eq!(challenge.len(), 1);
    assert!(challenge[0].packet.is_whoareyou());
    assert_eq!(challenge[0].dst, spoofed);

    b.receive(ping[0].packet.clone(), a.addr);
    settle(&mut a, &mut b);
    assert!(matches!(pong.try_recv(), Ok(Ok(RequestOutcome::Pong { .. }))));
    assert!(Arc::ptr_eq(&a.session_of(&b), &session));
}

#[tokio::test]
async fn a_node_authenticating_from_a_new_address_replaces_its_old_session() {
    init();
    let mut a = TestNode::new(9151);
    let mut b = TestNode::new(9152);
    handshake(&mut a, &mut b);
    let old = b.session_of(&a);

    // a shows up from another port and opens a new handshake
    let moved: SocketAddr = "127.0.0.1:9159".parse().unwrap();
    let random = Packet::random(packet::tag(&a.enr.node_id(), &b.enr.node_id()));
    b.receive(random, moved);
    assert!(old.is_authenticated());
    let whoareyou = b.flush().pop().unwrap();
    assert_eq!(whoareyou.dst, moved);

    let id_nonce = match &whoareyou.packet {
        Packet::WhoAreYou { id_nonce, .. } => *id_nonce,
        _ => unreachable!(),
    };
    let answer = forged_auth_packet(&a, &b, &id_nonce, |ephem| {
        crypto::sign_nonce(a.key(), &id_nonce, ephem).unwrap()
    });
    assert!(!b.receive(answer, moved).is_bad());

    assert!(old.is_closed());
    let current = b.session_of(&a);
    assert_eq!(current.address().socket_addr, moved);
    assert!(current.is_authenticated());
    assert_eq!(b.registry.len(), 1);
}

#[tokio::test]
async fn nodes_past_the_deadline_do_not_keep_a_request_alive() {
    init();
    let mut a = TestNode::with_config(
        9131,
        Discv5ConfigBuilder::new()
            .request_timeout(Duration::from_millis(300))
            .next_task_delay(Duration::from_secs(60))
            .build(),
    );
    let mut b = TestNode::new(9132);
    handshake(&mut a, &mut b);

    let b_enr = b.enr.clone();
    let mut nodes = a.request(&b_enr, TaskType::FindNode, TaskOptions::distance(256));
    assert_eq!(a.flush().len(), 1);
    let id = a.session_of(&b).first_sent_request().unwrap().id;
    let b_session = b.session_of(&a);

    let started = Instant::now();
    let mut resolved = None;
    for _ in 0..12 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        b_session
            .send_message(&Message::Nodes {
                id: id.clone(),
                total: u64::MAX,
                nodes: Vec::new(),
            })
            .unwrap();
        for datagram in b.flush() {
            a.receive(datagram.packet, b.addr);
        }
        if let Ok(result) = nodes.try_recv() {
            resolved = Some((result, started.elapsed()));
            break;
        }
    }

    let (result, elapsed) = resolved.expect("request resolved");
    assert_eq!(result, Err(RequestError::Timeout));
    assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
    assert_eq!(a.session_of(&b).pending_requests(), 0);
}

#[tokio::test]
async fn an_oversized_nodes_total_is_capped() {
    init();
    let mut a = TestNode::new(9161);
    let mut b = TestNode::new(9162);
    handshake(&mut a, &mut b);

    let b_enr = b.enr.clone();
    let mut nodes = a.request(&b_enr, TaskType::FindNode, TaskOptions::distance(256));
    assert_eq!(a.flush().len(), 1);
    let id = a.session_of(&b).first_sent_request().unwrap().id;
    let b_session = b.session_of(&a);

    for _ in 0..super::dispatch::MAX_NODES_RESPONSES {
        assert!(nodes.try_recv().is_err());
        b_session
            .send_message(&Message::Nodes {
                id: id.clone(),
                total: u64::MAX,
                nodes: Vec::new(),
            })
            .unwrap();
        for datagram in b.flush() {
            a.receive(datagram.packet, b.addr);
        }
    }
    assert_eq!(
        nodes.try_recv().unwrap(),
        Ok(RequestOutcome::Nodes(Vec::new()))
    );
}

#[tokio::test]
async fn random_packets_cannot_grow_the_session_table() {
    init();
    let mut a = TestNode::with_config(
        9141,
        Discv5ConfigBuilder::new()
            .next_task_delay(Duration::from_secs(60))
            .session_cache_capacity(16)
            .build(),
    );
    let sender: SocketAddr = "10.0.0.9:30303".parse().unwrap();

    for _ in 0..100 {
        let random = Packet::random(packet::tag(&NodeId::random(), &a.enr.node_id()));
        assert!(!a.receive(random, sender).is_bad());
    }
    assert_eq!(a.registry.len(), 16);
    assert_eq!(a.flush().len(), 100);
}
