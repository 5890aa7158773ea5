//! Timestamped MIDI event queue between producers and the render thread.
//!
//! A bounded non-blocking channel: producers enqueue packed short messages
//! or SysEx payloads tagged with the sample count at which they become due,
//! and the render loop drains events whose timestamp has been reached.
//! Enqueueing into a full queue fails visibly, never silently.

use thingbuf::mpsc::blocking::{channel, Receiver, Sender};

/// Default number of queued events.
pub const DEFAULT_MIDI_EVENT_QUEUE_SIZE: usize = 1024;

/// Payload of one queued event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MidiEventBody {
    /// Placeholder for recycled slots; never delivered.
    #[default]
    Empty,
    /// Packed short message: status in the low byte.
    Short(u32),
    /// A System Exclusive message, framing included.
    Sysex(Vec<u8>),
}

/// One timestamped event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MidiEvent {
    /// Due time, in rendered samples since the synth was opened.
    pub timestamp: u32,
    pub body: MidiEventBody,
}

/// Handle for enqueueing events from outside the render thread.
#[derive(Clone)]
pub struct MidiSender {
    tx: Sender<MidiEvent>,
}

impl MidiSender {
    /// Enqueue a packed short message. Returns false when the queue is full.
    pub fn push_short(&self, message: u32, timestamp: u32) -> bool {
        self.tx
            .try_send(MidiEvent {
                timestamp,
                body: MidiEventBody::Short(message),
            })
            .is_ok()
    }

    /// Enqueue a SysEx message. Returns false when the queue is full.
    pub fn push_sysex(&self, sysex: &[u8], timestamp: u32) -> bool {
        self.tx
            .try_send(MidiEvent {
                timestamp,
                body: MidiEventBody::Sysex(sysex.to_vec()),
            })
            .is_ok()
    }
}

/// The queue itself, owned by the synth.
pub struct MidiQueue {
    sender: MidiSender,
    rx: Receiver<MidiEvent>,
    peeked: Option<MidiEvent>,
}

impl MidiQueue {
    /// Create a queue. The capacity is rounded up to a power of two.
    pub fn new(capacity: usize) -> MidiQueue {
        let (tx, rx) = channel(capacity.max(2).next_power_of_two());
        MidiQueue {
            sender: MidiSender { tx },
            rx,
            peeked: None,
        }
    }

    /// A cloneable producer handle.
    pub fn sender(&self) -> MidiSender {
        self.sender.clone()
    }

    /// Enqueue a packed short message. Returns false when the queue is full.
    pub fn push_short(&self, message: u32, timestamp: u32) -> bool {
        self.sender.push_short(message, timestamp)
    }

    /// Enqueue a SysEx message. Returns false when the queue is full.
    pub fn push_sysex(&self, sysex: &[u8], timestamp: u32) -> bool {
        self.sender.push_sysex(sysex, timestamp)
    }

    /// Timestamp of the next event without consuming it.
    pub fn peek_timestamp(&mut self) -> Option<u32> {
        if self.peeked.is_none() {
            self.peeked = self.rx.try_recv().ok();
        }
        self.peeked.as_ref().map(|event| event.timestamp)
    }

    /// Take the next event.
    pub fn pop(&mut self) -> Option<MidiEvent> {
        if let Some(event) = self.peeked.take() {
            return Some(event);
        }
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_come_out_in_enqueue_order() {
        let mut queue = MidiQueue::new(16);
        assert!(queue.push_short(0x7F_3C_91, 0));
        assert!(queue.push_short(0x00_3C_91, 0));
        assert!(queue.push_sysex(&[0xF0, 0xF7], 5));
        assert_eq!(queue.peek_timestamp(), Some(0));
        assert_eq!(queue.pop().unwrap().body, MidiEventBody::Short(0x7F_3C_91));
        assert_eq!(queue.pop().unwrap().body, MidiEventBody::Short(0x00_3C_91));
        assert_eq!(queue.peek_timestamp(), Some(5));
        assert_eq!(
            queue.pop().unwrap().body,
            MidiEventBody::Sysex(vec![0xF0, 0xF7])
        );
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn overflow_is_reported_to_the_producer() {
        let queue = MidiQueue::new(4);
        for _ in 0..4 {
            assert!(queue.push_short(0x91, 0));
        }
        assert!(!queue.push_short(0x91, 0));
    }

    #[test]
    fn peeking_does_not_lose_events() {
        let mut queue = MidiQueue::new(4);
        queue.push_short(1, 9);
        assert_eq!(queue.peek_timestamp(), Some(9));
        assert_eq!(queue.peek_timestamp(), Some(9));
        assert!(queue.pop().is_some());
        assert_eq!(queue.peek_timestamp(), None);
    }
}
