//! Guard predicates of the envelope handlers. A failed guard is logged at trace level and the
//! handler leaves the envelope untouched.
use super::{Envelope, Field};
use crate::{
    session::{NodeSession, SessionStatus, TaskType},
    Enr,
};
use tracing::trace;

/// The envelope carries `field`.
pub fn require_field(envelope: &Envelope, field: Field) -> bool {
    if envelope.contains(field) {
        true
    } else {
        trace!(
            "Envelope #{}: requirement not satisfied, field {:?} missing",
            envelope.id(),
            field
        );
        false
    }
}

/// The envelope does not carry `field`.
pub fn require_absent(envelope: &Envelope, field: Field) -> bool {
    if envelope.contains(field) {
        trace!(
            "Envelope #{}: requirement not satisfied, field {:?} present",
            envelope.id(),
            field
        );
        false
    } else {
        true
    }
}

/// The session is in one of `states`.
pub fn require_session_state(
    envelope: &Envelope,
    session: &NodeSession,
    states: &[SessionStatus],
) -> bool {
    let status = session.status();
    if states.contains(&status) {
        true
    } else {
        trace!(
            "Envelope #{}: requirement not satisfied, session {} is {:?}, expected one of {:?}",
            envelope.id(),
            session.address(),
            status,
            states
        );
        false
    }
}

/// The envelope carries a new request of kind `task`.
pub fn require_task(envelope: &Envelope, task: TaskType) -> bool {
    match envelope.task() {
        Some(found) if found == task => true,
        found => {
            trace!(
                "Envelope #{}: requirement not satisfied, task {:?} expected, found {:?}",
                envelope.id(),
                task,
                found
            );
            false
        }
    }
}

/// The record of the session's peer.
pub fn require_node_record(envelope: &Envelope, session: &NodeSession) -> Option<Enr> {
    let record = session.node_record();
    if record.is_none() {
        trace!(
            "Envelope #{}: requirement not satisfied, no record of {}",
            envelope.id(),
            session.address()
        );
    }
    record
}

pub fn require_condition(envelope: &Envelope, condition: bool, description: &str) -> bool {
    if !condition {
        trace!(
            "Envelope #{}: requirement not satisfied, {}",
            envelope.id(),
            description
        );
    }
    condition
}

/// The envelope has failed and should be skipped.
pub fn is_bad_packet(envelope: &Envelope) -> bool {
    if envelope.is_bad() {
        trace!("Envelope #{}: skipped, bad packet", envelope.id());
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{packet::Packet, pipeline::FieldValue};

    #[test]
    fn field_guards() {
        let mut envelope = Envelope::new();
        assert!(!require_field(&envelope, Field::IncomingPacket));
        assert!(require_absent(&envelope, Field::IncomingPacket));

        envelope.put(
            Field::IncomingPacket,
            FieldValue::Packet(Packet::random([0u8; 32])),
        );
        assert!(require_field(&envelope, Field::IncomingPacket));
        assert!(!require_absent(&envelope, Field::IncomingPacket));

        assert!(!require_task(&envelope, TaskType::Ping));
        envelope.put(Field::Task, FieldValue::Task(TaskType::FindNode));
        assert!(!require_task(&envelope, TaskType::Ping));
        assert!(require_task(&envelope, TaskType::FindNode));

        assert!(require_condition(&envelope, true, "always"));
        assert!(!require_condition(&envelope, false, "never"));

        assert!(!is_bad_packet(&envelope));
        envelope.mark_bad("first");
        envelope.mark_bad("second");
        assert!(is_bad_packet(&envelope));
        assert_eq!(envelope.bad_packet(), Some("first"));
    }
}
