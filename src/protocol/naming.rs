//! Deterministic exchange, queue and routing-key names
//!
//! These names are shared with every connector and worker that talks to the
//! broker, so the formats below must stay bit-exact.

/// Connector id of the internal synchronisation worker queue
pub const INTERNAL_SYNC_QUEUE: &str = "sync";
/// Connector id of the internal playbook worker queue
pub const INTERNAL_PLAYBOOK_QUEUE: &str = "playbook";

/// Traffic direction of a connector queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound traffic for the connector, routed by the connector exchange
    Listen,
    /// Outbound traffic from the connector to workers, routed by the worker exchange
    Push,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Listen => "listen",
            Direction::Push => "push",
        }
    }
}

/// Name derivation bound to a process-wide prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    prefix: String,
}

impl Naming {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>amqp.connector.exchange`
    pub fn connector_exchange(&self) -> String {
        format!("{}amqp.connector.exchange", self.prefix)
    }

    /// `<prefix>amqp.worker.exchange`
    pub fn worker_exchange(&self) -> String {
        format!("{}amqp.worker.exchange", self.prefix)
    }

    /// Exchange that routes traffic of the given direction
    pub fn exchange(&self, direction: Direction) -> String {
        match direction {
            Direction::Listen => self.connector_exchange(),
            Direction::Push => self.worker_exchange(),
        }
    }

    /// `<prefix>listen_<id>` or `<prefix>push_<id>`
    pub fn queue(&self, direction: Direction, id: &str) -> String {
        format!("{}{}_{id}", self.prefix, direction.as_str())
    }

    /// `<prefix>listen_routing_<id>` or `<prefix>push_routing_<id>`
    pub fn routing_key(&self, direction: Direction, id: &str) -> String {
        format!("{}{}_routing_{id}", self.prefix, direction.as_str())
    }

    pub fn listen_queue(&self, id: &str) -> String {
        self.queue(Direction::Listen, id)
    }

    pub fn push_queue(&self, id: &str) -> String {
        self.queue(Direction::Push, id)
    }

    pub fn listen_routing(&self, id: &str) -> String {
        self.routing_key(Direction::Listen, id)
    }

    pub fn push_routing(&self, id: &str) -> String {
        self.routing_key(Direction::Push, id)
    }

    /// Whether a broker queue belongs to this namespace
    pub fn owns_queue(&self, queue_name: &str) -> bool {
        queue_name.starts_with(&self.prefix)
    }

    /// Whether a broker queue is a push queue of this namespace
    pub fn is_push_queue(&self, queue_name: &str) -> bool {
        queue_name.starts_with(&format!("{}{}_", self.prefix, Direction::Push.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn distinct_ids_never_collide(a in "[a-zA-Z0-9._-]{1,40}", b in "[a-zA-Z0-9._-]{1,40}") {
            prop_assume!(a != b);
            let naming = Naming::new("pfx_");
            prop_assert_ne!(naming.listen_queue(&a), naming.listen_queue(&b));
            prop_assert_ne!(naming.push_queue(&a), naming.push_queue(&b));
            prop_assert_ne!(naming.listen_routing(&a), naming.listen_routing(&b));
            prop_assert_ne!(naming.push_routing(&a), naming.push_routing(&b));
        }

        #[test]
        fn derivation_is_deterministic(id in ".*", prefix in "[a-z_]{0,8}") {
            let first = Naming::new(prefix.clone());
            let second = Naming::new(prefix);
            prop_assert_eq!(first.listen_queue(&id), second.listen_queue(&id));
            prop_assert_eq!(first.push_queue(&id), second.push_queue(&id));
            prop_assert_eq!(first.listen_routing(&id), second.listen_routing(&id));
            prop_assert_eq!(first.push_routing(&id), second.push_routing(&id));
        }

        #[test]
        fn listen_and_push_names_differ(id in ".*") {
            let naming = Naming::new("");
            prop_assert_ne!(naming.listen_queue(&id), naming.push_queue(&id));
            prop_assert_ne!(naming.listen_routing(&id), naming.push_routing(&id));
        }

        #[test]
        fn derived_queues_are_owned(id in ".*", prefix in "[a-z_]{0,8}") {
            let naming = Naming::new(prefix);
            prop_assert!(naming.owns_queue(&naming.listen_queue(&id)));
            prop_assert!(naming.is_push_queue(&naming.push_queue(&id)));
        }
    }

    #[test]
    fn test_exact_formats() {
        let naming = Naming::new("opencti_");
        assert_eq!(
            naming.connector_exchange(),
            "opencti_amqp.connector.exchange"
        );
        assert_eq!(naming.worker_exchange(), "opencti_amqp.worker.exchange");
        assert_eq!(naming.listen_queue("conn-1"), "opencti_listen_conn-1");
        assert_eq!(naming.push_queue("conn-1"), "opencti_push_conn-1");
        assert_eq!(
            naming.listen_routing("conn-1"),
            "opencti_listen_routing_conn-1"
        );
        assert_eq!(naming.push_routing("conn-1"), "opencti_push_routing_conn-1");
    }

    #[test]
    fn test_empty_prefix() {
        let naming = Naming::new("");
        assert_eq!(naming.connector_exchange(), "amqp.connector.exchange");
        assert_eq!(naming.listen_queue("x"), "listen_x");
        assert_eq!(naming.push_routing("x"), "push_routing_x");
        assert!(naming.owns_queue("anything"));
    }

    #[test]
    fn test_exchange_by_direction() {
        let naming = Naming::new("p_");
        assert_eq!(naming.exchange(Direction::Listen), naming.connector_exchange());
        assert_eq!(naming.exchange(Direction::Push), naming.worker_exchange());
    }

    #[test]
    fn test_push_queue_detection() {
        let naming = Naming::new("p_");
        assert!(naming.is_push_queue("p_push_conn-1"));
        assert!(!naming.is_push_queue("p_listen_conn-1"));
        assert!(!naming.is_push_queue("other_push_conn-1"));
        assert!(!naming.owns_queue("other_listen_conn-1"));
    }

    #[test]
    fn test_internal_queue_names() {
        let naming = Naming::new("");
        assert_eq!(naming.push_routing(INTERNAL_SYNC_QUEUE), "push_routing_sync");
        assert_eq!(
            naming.push_routing(INTERNAL_PLAYBOOK_QUEUE),
            "push_routing_playbook"
        );
    }
}
