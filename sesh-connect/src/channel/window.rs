//! Per-channel flow control.

/// The window we granted to the peer, consumed by the data it sends us.
///
/// Received bytes stay accounted as `unread` until the application reads them,
/// so the credit granted back never exceeds what was actually drained.
#[derive(Debug)]
pub struct LocalWindow {
    size: u32,
    unread: u32,
    maximum: u32,
}

impl LocalWindow {
    pub fn new(maximum: u32) -> Self {
        Self {
            size: maximum,
            unread: 0,
            maximum,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Account for `amount` bytes received, failing if the peer exceeded its credit.
    pub fn consume(&mut self, amount: u32) -> Option<()> {
        self.size = self.size.checked_sub(amount)?;
        self.unread = self.unread.saturating_add(amount);

        Some(())
    }

    /// Account for `amount` bytes handed over to the application, or discarded.
    pub fn release(&mut self, amount: u32) {
        self.unread = self.unread.saturating_sub(amount);
    }

    /// The credit to grant back to the peer, once the window and the unread bytes
    /// dropped below half its maximum, bounded by the bytes released.
    pub fn adjustable(&mut self) -> Option<u32> {
        let held = self.size.saturating_add(self.unread);

        if held < self.maximum / 2 {
            let bytes_to_add = self.maximum - held;
            self.size += bytes_to_add;

            Some(bytes_to_add)
        } else {
            None
        }
    }
}

/// The window the peer granted us, consumed by the data we send.
#[derive(Debug)]
pub struct RemoteWindow {
    size: u32,
    packet: u32,
}

impl RemoteWindow {
    pub fn new(size: u32, packet: u32) -> Self {
        Self { size, packet }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn packet(&self) -> u32 {
        self.packet
    }

    pub fn replenish(&mut self, bytes_to_add: u32) {
        self.size = self.size.saturating_add(bytes_to_add);
    }

    /// Reserve up to `amount` bytes from the window, bounded by the maximum packet size.
    pub fn reserve(&mut self, amount: usize) -> usize {
        let reserved = amount
            .min(self.size as usize)
            .min(self.packet as usize);
        self.size -= reserved as u32;

        reserved
    }
}
