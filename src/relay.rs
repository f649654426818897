use tracing::warn;

use crate::protocol::{self, Inbound};
use crate::state::Registry;

/// Envelope timestamps, in the clock format clients render.
pub fn now_stamp() -> String {
    chrono::Local::now().format("%I:%M %p").to_string()
}

/// Fan a peer message out to every current member, the sender included.
pub fn broadcast(registry: &Registry, sender: &str, message: &Inbound) {
    let line = protocol::envelope(sender, &now_stamp(), &message.wire_body());
    deliver(registry, &line);
}

/// Fan a server notice (join/leave) out to every current member.
pub fn announce(registry: &Registry, text: &str) {
    let line = protocol::announcement(&now_stamp(), text);
    deliver(registry, &line);
}

fn deliver(registry: &Registry, line: &str) {
    for member in registry.snapshot() {
        // One unreachable peer never aborts delivery to the rest, and
        // never mutates the registry: its own supervisor cleans it up.
        if let Err(err) = member.send(line.to_string()) {
            warn!(
                conn = member.id(),
                name = %member.name(),
                %err,
                "dropping broadcast for unreachable peer"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Connection;
    use crate::state::NamePolicy;

    #[test]
    fn broadcast_reaches_every_member_including_sender() {
        let registry = Registry::new(NamePolicy::Permissive);
        let (alice, mut alice_rx) = Connection::stub("alice", 4);
        let (bob, mut bob_rx) = Connection::stub("bob", 4);
        registry.register(alice).unwrap();
        registry.register(bob).unwrap();

        broadcast(&registry, "alice", &Inbound::Text("hi".into()));

        for rx in [&mut alice_rx, &mut bob_rx] {
            let line = rx.try_recv().unwrap();
            assert!(line.starts_with("[alice "));
            assert!(line.ends_with("]: TEXT:hi"));
        }
    }

    #[test]
    fn announcement_carries_the_server_sender() {
        let registry = Registry::new(NamePolicy::Permissive);
        let (bob, mut bob_rx) = Connection::stub("bob", 4);
        registry.register(bob).unwrap();

        announce(&registry, &protocol::join_notice("alice"));

        let line = bob_rx.try_recv().unwrap();
        assert!(line.starts_with("[SERVER "));
        assert!(line.ends_with("]: alice has joined the chat!"));
    }

    #[test]
    fn one_dead_recipient_does_not_stop_the_fanout() {
        let registry = Registry::new(NamePolicy::Permissive);
        let (alice, mut alice_rx) = Connection::stub("alice", 4);
        let (dead, dead_rx) = Connection::stub("dead", 4);
        let (carol, mut carol_rx) = Connection::stub("carol", 4);
        registry.register(alice).unwrap();
        registry.register(dead.clone()).unwrap();
        registry.register(carol).unwrap();

        // Its writer is gone, so every send to it fails.
        drop(dead_rx);

        broadcast(&registry, "alice", &Inbound::Text("still here?".into()));

        assert!(alice_rx.try_recv().unwrap().ends_with("]: TEXT:still here?"));
        assert!(carol_rx.try_recv().unwrap().ends_with("]: TEXT:still here?"));
        // The failed member is the supervisor's to remove, not the relay's.
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn backlogged_recipient_loses_the_line_but_others_receive_it() {
        let registry = Registry::new(NamePolicy::Permissive);
        let (slow, mut slow_rx) = Connection::stub("slow", 1);
        let (carol, mut carol_rx) = Connection::stub("carol", 4);
        registry.register(slow.clone()).unwrap();
        registry.register(carol).unwrap();

        broadcast(&registry, "carol", &Inbound::Text("one".into()));
        broadcast(&registry, "carol", &Inbound::Text("two".into()));

        // The slow peer only ever saw the first line.
        assert!(slow_rx.try_recv().unwrap().ends_with("]: TEXT:one"));
        assert!(slow_rx.try_recv().is_err());

        assert!(carol_rx.try_recv().unwrap().ends_with("]: TEXT:one"));
        assert!(carol_rx.try_recv().unwrap().ends_with("]: TEXT:two"));
    }
}
