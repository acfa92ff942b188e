//! Unsolicited result codes and their delivery to subscribers.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use heapless::{Deque, Vec};

use crate::{
    command::response::Tokens, config::UrcPolicy, error::Error, MAX_SUBSCRIBERS, URC_BACKLOG,
};

/// An unsolicited line, keyed by the URC prefix that matched it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Urc {
    pub topic: &'static str,
    pub payload: Tokens,
}

impl Urc {
    pub fn text(&self) -> &str {
        self.payload.text()
    }
}

/// Receiver of URCs. Delivery is fire-and-forget and must not block.
pub trait UrcSubscriber {
    fn notify(&self, urc: &Urc);
}

impl<M: RawMutex, const N: usize> UrcSubscriber for Channel<M, Urc, N> {
    fn notify(&self, urc: &Urc) {
        if self.try_send(urc.clone()).is_err() {
            warn!("URC subscriber full, dropping {}", urc.topic);
        }
    }
}

pub struct UrcRouter<'d> {
    subscribers: Vec<&'d dyn UrcSubscriber, MAX_SUBSCRIBERS>,
    policy: UrcPolicy,
    backlog: Deque<Urc, URC_BACKLOG>,
}

impl<'d> UrcRouter<'d> {
    pub fn new(policy: UrcPolicy) -> Self {
        Self {
            subscribers: Vec::new(),
            policy,
            backlog: Deque::new(),
        }
    }

    /// Register a subscriber. The first subscriber receives the backlog kept
    /// under [`UrcPolicy::Buffer`].
    pub fn subscribe(&mut self, subscriber: &'d dyn UrcSubscriber) -> Result<(), Error> {
        self.subscribers
            .push(subscriber)
            .map_err(|_| Error::SubscriberOverflow)?;

        while let Some(urc) = self.backlog.pop_front() {
            subscriber.notify(&urc);
        }
        Ok(())
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers.len()
    }

    pub fn dispatch(&mut self, urc: &Urc) {
        if !self.subscribers.is_empty() {
            for subscriber in self.subscribers.iter() {
                subscriber.notify(urc);
            }
            return;
        }

        match self.policy {
            UrcPolicy::Drop => trace!("No URC subscriber, dropping {}", urc.topic),
            UrcPolicy::Buffer => {
                if self.backlog.is_full() {
                    warn!("URC backlog full, dropping oldest");
                    self.backlog.pop_front();
                }
                // Cannot fail, a slot was freed above
                let _ = self.backlog.push_back(urc.clone());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::RefCell;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn urc(line: &str) -> Urc {
        Urc {
            topic: "+UGNSINF:",
            payload: Tokens::new(line, ',').unwrap(),
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<std::vec::Vec<std::string::String>>);

    impl UrcSubscriber for Recorder {
        fn notify(&self, urc: &Urc) {
            self.0.borrow_mut().push(urc.text().into());
        }
    }

    #[test]
    fn delivers_to_every_subscriber() {
        let a = Recorder::default();
        let b: Channel<NoopRawMutex, Urc, 2> = Channel::new();

        let mut router = UrcRouter::new(UrcPolicy::Drop);
        router.subscribe(&a).unwrap();
        router.subscribe(&b).unwrap();
        router.dispatch(&urc("+UGNSINF: 1,0"));

        assert_eq!(*a.0.borrow(), vec!["+UGNSINF: 1,0"]);
        assert_eq!(b.try_receive().unwrap().text(), "+UGNSINF: 1,0");
    }

    #[test]
    fn full_channel_does_not_block() {
        let ch: Channel<NoopRawMutex, Urc, 1> = Channel::new();
        let mut router = UrcRouter::new(UrcPolicy::Drop);
        router.subscribe(&ch).unwrap();

        router.dispatch(&urc("+UGNSINF: 1"));
        router.dispatch(&urc("+UGNSINF: 2"));

        assert_eq!(ch.try_receive().unwrap().text(), "+UGNSINF: 1");
        assert!(ch.try_receive().is_err());
    }

    #[test]
    fn drop_policy_forgets_early_urcs() {
        let late = Recorder::default();
        let mut router = UrcRouter::new(UrcPolicy::Drop);
        router.dispatch(&urc("+UGNSINF: 1"));

        router.subscribe(&late).unwrap();
        assert!(late.0.borrow().is_empty());
    }

    #[test]
    fn buffer_policy_replays_backlog() {
        let late = Recorder::default();
        let mut router = UrcRouter::new(UrcPolicy::Buffer);
        for i in 0..URC_BACKLOG + 2 {
            router.dispatch(&urc(&std::format!("+UGNSINF: {}", i)));
        }

        router.subscribe(&late).unwrap();

        let seen = late.0.borrow();
        assert_eq!(seen.len(), URC_BACKLOG);
        assert_eq!(seen[0], "+UGNSINF: 2");
    }

    #[test]
    fn subscriber_list_is_bounded() {
        let recorders: std::vec::Vec<Recorder> =
            (0..=MAX_SUBSCRIBERS).map(|_| Recorder::default()).collect();
        let mut router = UrcRouter::new(UrcPolicy::Drop);
        for r in &recorders[..MAX_SUBSCRIBERS] {
            router.subscribe(r).unwrap();
        }
        assert_eq!(
            router.subscribe(&recorders[MAX_SUBSCRIBERS]),
            Err(Error::SubscriberOverflow)
        );
    }
}
