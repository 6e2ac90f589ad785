//! Message fragmentation and reassembly.
//!
//! A message is carried by a run of frames sharing the message identifier.
//! The first frame sets the first fragment flag, the final frame sets the last
//! fragment flag; a message fitting a single frame sets both.

use crate::id::Flags;
use crate::{CanId, Frame, NodeHandle, MAX_DATA_LEN, MAX_NODES};
use alloc::vec::Vec;

/// Application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Identifier without fragment flags.
    pub id: CanId,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(id: CanId, data: Vec<u8>) -> Self {
        Message {
            id: id.message_id(),
            data,
        }
    }

    /// Start a message from its first frame.
    pub fn from_frame(frame: &Frame) -> Self {
        Message::new(frame.can_id(), frame.payload().to_vec())
    }

    pub fn append_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Node the message comes from or goes to.
    pub fn node(&self) -> NodeHandle {
        self.id.node_handle()
    }

    /// Split the message into the frames carrying it, in send order.
    pub fn fragments(&self) -> Fragments<'_> {
        Fragments {
            message: self,
            pos: 0,
            done: false,
        }
    }
}

/// Iterator over the frames of a [`Message`].
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    message: &'a Message,
    pos: usize,
    done: bool,
}

impl Iterator for Fragments<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }

        let data = &self.message.data;
        let mut flags = Flags::Extended;
        if self.pos == 0 {
            flags |= Flags::First;
        }

        let remaining = data.len() - self.pos;
        let len = if remaining <= MAX_DATA_LEN {
            flags |= Flags::Last;
            self.done = true;
            remaining
        } else {
            MAX_DATA_LEN
        };

        let id = self.message.id.message_id().with_flags(flags);
        let frame = Frame::from_parts(id, &data[self.pos..self.pos + len]);
        self.pos += len;

        frame
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = if self.done {
            0
        } else {
            (self.message.data.len() - self.pos).div_ceil(MAX_DATA_LEN).max(1)
        };
        (len, Some(len))
    }
}

impl ExactSizeIterator for Fragments<'_> {}

/// Reason a frame was dropped by the [`Reassembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Violation {
    /// Standard or remote frame.
    Malformed,
    /// Frame flagged as an error frame by the controller.
    ErrorFrame,
    /// First fragment while a message from the node was in progress.
    UnexpectedFirst(NodeHandle),
    /// Continuation fragment without a message in progress.
    MissingFirst(NodeHandle),
}

/// Result of feeding a frame to the [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// Frame stored, message incomplete.
    Pending(NodeHandle),
    /// Last fragment received.
    Complete(Message),
    /// Control frame for the adapter command handler.
    Control(Frame),
    /// Frame discarded.
    Dropped(Violation),
}

/// Per node reassembly slots.
///
/// Each node has at most one message in progress. Frames of one node must be
/// fed in arrival order; frames of different nodes may interleave freely.
#[derive(Debug)]
pub struct Reassembler {
    slots: [Option<Message>; MAX_NODES],
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Whether a message from `node` is in progress.
    pub fn is_pending(&self, node: NodeHandle) -> bool {
        self.slots[node.index()].is_some()
    }

    /// Drop all partial messages.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn push(&mut self, frame: &Frame) -> Reassembly {
        let id = frame.can_id();

        if !id.extended() || id.remote() {
            #[cfg(feature = "defmt-03")]
            defmt::warn!("Got malformed frame, discarding");
            return Reassembly::Dropped(Violation::Malformed);
        }

        if id.control() {
            return Reassembly::Control(*frame);
        }

        if id.error() {
            #[cfg(feature = "defmt-03")]
            defmt::error!("Received error frame on CAN controller");
            return Reassembly::Dropped(Violation::ErrorFrame);
        }

        let node = id.node_handle();
        let slot = &mut self.slots[node.index()];

        if id.first() {
            if slot.is_some() {
                #[cfg(feature = "defmt-03")]
                defmt::warn!("Node {}: first fragment while reassembling, discarding", node);
                *slot = None;
                return Reassembly::Dropped(Violation::UnexpectedFirst(node));
            }
            *slot = Some(Message::from_frame(frame));
        } else {
            match slot {
                Some(message) => message.append_data(frame.payload()),
                None => {
                    #[cfg(feature = "defmt-03")]
                    defmt::warn!("Node {}: fragment without first fragment, discarding", node);
                    return Reassembly::Dropped(Violation::MissingFirst(node));
                }
            }
        }

        if id.last() {
            match slot.take() {
                Some(message) => Reassembly::Complete(message),
                None => unreachable!(),
            }
        } else {
            Reassembly::Pending(node)
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Reassembler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> NodeHandle {
        NodeHandle::try_from(n).unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|n| (n * 7 + 3) as u8).collect()
    }

    fn data_frame(node: NodeHandle, flags: Flags, data: &[u8]) -> Frame {
        let id = CanId::new_message(node, 0x10).with_flags(flags);
        Frame::from_parts(id, data).unwrap()
    }

    #[test]
    fn round_trip() {
        for len in [0usize, 1, 7, 8, 9, 16, 17, 1000] {
            let message = Message::new(CanId::new_message(node(42), 0x1234), payload(len));
            let frames: Vec<Frame> = message.fragments().collect();

            assert_eq!(frames.len(), len.max(1).div_ceil(8), "len {}", len);
            assert_eq!(message.fragments().len(), frames.len());

            let mut reassembler = Reassembler::new();
            let mut complete = None;
            for frame in &frames {
                if let Reassembly::Complete(message) = reassembler.push(frame) {
                    assert!(complete.is_none());
                    complete = Some(message);
                }
            }

            assert_eq!(complete, Some(message), "len {}", len);
            assert!(!reassembler.is_pending(node(42)));
        }
    }

    #[test]
    fn single_frame_message() {
        for len in 0..=8 {
            let message = Message::new(CanId::new_message(node(1), 5), payload(len));
            let frames: Vec<Frame> = message.fragments().collect();

            assert_eq!(frames.len(), 1);
            let id = frames[0].can_id();
            assert!(id.first() && id.last() && id.extended());
            assert_eq!(frames[0].dlc() as usize, len);
        }
    }

    #[test]
    fn fragment_flags() {
        let message = Message::new(CanId::new_message(node(3), 9), payload(20));
        let frames: Vec<Frame> = message.fragments().collect();
        let lengths: Vec<u8> = frames.iter().map(|frame| frame.dlc()).collect();

        assert_eq!(lengths, vec![8, 8, 4]);
        assert!(frames[0].can_id().first() && !frames[0].can_id().last());
        assert!(!frames[1].can_id().first() && !frames[1].can_id().last());
        assert!(!frames[2].can_id().first() && frames[2].can_id().last());
        for frame in &frames {
            assert_eq!(frame.can_id().message_id(), message.id);
        }
    }

    #[test]
    fn message_id_strips_flags() {
        let id = CanId::new_message(node(2), 1).with_flags(Flags::First | Flags::Last);
        let message = Message::new(id, Vec::new());

        assert!(!message.id.first());
        assert!(!message.id.last());
        assert!(!message.id.extended());
        assert_eq!(message.node(), node(2));
    }

    #[test]
    fn missing_first_leaves_slot_empty() {
        let mut reassembler = Reassembler::new();

        let out = reassembler.push(&data_frame(node(4), Flags::Extended, &[1, 2]));
        assert_eq!(out, Reassembly::Dropped(Violation::MissingFirst(node(4))));
        assert!(!reassembler.is_pending(node(4)));

        let out = reassembler.push(&data_frame(node(4), Flags::Extended | Flags::Last, &[3]));
        assert_eq!(out, Reassembly::Dropped(Violation::MissingFirst(node(4))));
        assert!(!reassembler.is_pending(node(4)));
    }

    #[test]
    fn violation_does_not_touch_other_nodes() {
        let mut reassembler = Reassembler::new();

        reassembler.push(&data_frame(node(1), Flags::Extended | Flags::First, &[1; 8]));
        reassembler.push(&data_frame(node(2), Flags::Extended, &[9; 8]));
        assert!(reassembler.is_pending(node(1)));
        assert!(!reassembler.is_pending(node(2)));

        let out = reassembler.push(&data_frame(node(1), Flags::Extended | Flags::Last, &[2]));
        match out {
            Reassembly::Complete(message) => {
                assert_eq!(message.data, [[1u8; 8].as_slice(), &[2]].concat());
                assert_eq!(message.node(), node(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn interleaved_nodes() {
        let mut reassembler = Reassembler::new();
        let first = Flags::Extended | Flags::First;
        let last = Flags::Extended | Flags::Last;

        reassembler.push(&data_frame(node(1), first, b"hello, w"));
        reassembler.push(&data_frame(node(2), first, b"goodbye,"));
        let one = reassembler.push(&data_frame(node(1), last, b"orld"));
        let two = reassembler.push(&data_frame(node(2), last, b" moon"));

        match (one, two) {
            (Reassembly::Complete(one), Reassembly::Complete(two)) => {
                assert_eq!(one.data, b"hello, world");
                assert_eq!(two.data, b"goodbye, moon");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unexpected_first_clears_slot() {
        let mut reassembler = Reassembler::new();
        let first = Flags::Extended | Flags::First;

        reassembler.push(&data_frame(node(6), first, &[1; 8]));
        let out = reassembler.push(&data_frame(node(6), first, &[2; 8]));

        assert_eq!(out, Reassembly::Dropped(Violation::UnexpectedFirst(node(6))));
        assert!(!reassembler.is_pending(node(6)));

        // next message starts cleanly
        let out = reassembler.push(&data_frame(node(6), first | Flags::Last, &[3]));
        assert!(matches!(out, Reassembly::Complete(message) if message.data == [3]));
    }

    #[test]
    fn error_frame_keeps_progress() {
        let mut reassembler = Reassembler::new();

        reassembler.push(&data_frame(node(8), Flags::Extended | Flags::First, &[1; 8]));
        let out = reassembler.push(&data_frame(node(8), Flags::Extended | Flags::Error, &[]));

        assert_eq!(out, Reassembly::Dropped(Violation::ErrorFrame));
        assert!(reassembler.is_pending(node(8)));
    }

    #[test]
    fn malformed_frames() {
        let mut reassembler = Reassembler::new();

        let standard = Frame::from_parts(CanId::from_raw(0x123), &[1]).unwrap();
        assert_eq!(reassembler.push(&standard), Reassembly::Dropped(Violation::Malformed));

        let remote = data_frame(node(1), Flags::Extended | Flags::Remote | Flags::First, &[]);
        assert_eq!(reassembler.push(&remote), Reassembly::Dropped(Violation::Malformed));
    }

    #[test]
    fn control_frames_are_forwarded() {
        let mut reassembler = Reassembler::new();
        let id = CanId::new_control(4, 0).with_flags(Flags::Extended);
        let frame = Frame::from_parts(id, &[0; 8]).unwrap();

        assert_eq!(reassembler.push(&frame), Reassembly::Control(frame));
    }
}
