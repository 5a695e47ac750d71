// Message flag bitset

use bitflags::bitflags;

bitflags! {
    /// Flags byte carried in every message header.
    ///
    /// `HAS_PID` is derived from the presence of a parent id and is
    /// forced on or off when the header is encoded.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u8 {
        const HAS_PID = 1 << 0;
        const IMPORTANT = 1 << 1;
        const NO_REPLY = 1 << 2;
        const NO_CHALLENGE = 1 << 3;
        const UNDER_DURESS = 1 << 7;

        // Bits reserved by newer protocol revisions survive a decode/encode cycle
        const _ = !0;
    }
}

impl MessageFlags {
    pub fn has_pid(self) -> bool {
        self.contains(MessageFlags::HAS_PID)
    }

    pub fn is_important(self) -> bool {
        self.contains(MessageFlags::IMPORTANT)
    }

    pub fn is_no_reply(self) -> bool {
        self.contains(MessageFlags::NO_REPLY)
    }

    pub fn is_no_challenge(self) -> bool {
        self.contains(MessageFlags::NO_CHALLENGE)
    }

    pub fn is_under_duress(self) -> bool {
        self.contains(MessageFlags::UNDER_DURESS)
    }
}
