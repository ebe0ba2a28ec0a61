
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Uplink
    Ul,
    /// Downlink
    Dl,
}

impl Direction {
    #[inline]
    pub fn is_ul(&self) -> bool {
        matches!(self, Direction::Ul)
    }

    #[inline]
    pub fn is_dl(&self) -> bool {
        matches!(self, Direction::Dl)
    }
}
