//! Closed identifier sets for message sources and destinations
//!
//! Every peripheral that can receive a message has a [`TargetId`]; every
//! producer stamps its messages with a [`SourceId`]. Destination lists are
//! carried as a [`TargetSet`] bitmask rather than a sentinel-terminated array.

use std::fmt;

/// Largest payload any pool may be configured for (bytes)
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Number of distinct targets
pub const TARGET_COUNT: usize = TargetId::ALL.len();

/// Message destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TargetId {
    Usb = 0,
    Uart,
    Rgb,
    Log,
    Sse,
    SseConsole,
    SseLineSensor,
    MotorDriver,
    LidarCoord,
    LidarIo,
    UsbMsc,
    UsbCdc,
    OledIndev,
    Ultrasonic,
    LineSensorWindow,
    Battery,
    PoolTest,
}

impl TargetId {
    /// All targets in ascending index order
    pub const ALL: [TargetId; 17] = [
        TargetId::Usb,
        TargetId::Uart,
        TargetId::Rgb,
        TargetId::Log,
        TargetId::Sse,
        TargetId::SseConsole,
        TargetId::SseLineSensor,
        TargetId::MotorDriver,
        TargetId::LidarCoord,
        TargetId::LidarIo,
        TargetId::UsbMsc,
        TargetId::UsbCdc,
        TargetId::OledIndev,
        TargetId::Ultrasonic,
        TargetId::LineSensorWindow,
        TargetId::Battery,
        TargetId::PoolTest,
    ];

    /// Table index of this target
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Target for a table index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short lowercase name, used in log lines and thread names
    pub const fn name(self) -> &'static str {
        match self {
            TargetId::Usb => "usb",
            TargetId::Uart => "uart",
            TargetId::Rgb => "rgb",
            TargetId::Log => "log",
            TargetId::Sse => "sse",
            TargetId::SseConsole => "sse_console",
            TargetId::SseLineSensor => "sse_line_sensor",
            TargetId::MotorDriver => "motor_driver",
            TargetId::LidarCoord => "lidar_coord",
            TargetId::LidarIo => "lidar_io",
            TargetId::UsbMsc => "usb_msc",
            TargetId::UsbCdc => "usb_cdc",
            TargetId::OledIndev => "oled_indev",
            TargetId::Ultrasonic => "ultrasonic",
            TargetId::LineSensorWindow => "line_sensor_window",
            TargetId::Battery => "battery",
            TargetId::PoolTest => "pool_test",
        }
    }

    const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Message origins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SourceId {
    Usb = 0,
    Uart,
    UsbCdc,
    UsbMsc,
    MscButton,
    LineSensor,
    LineSensorWindow,
    LidarCoord,
    LidarIo,
    Battery,
    Ultrasonic,
    Rest,
    PoolTest,
    #[default]
    Undefined,
}

impl SourceId {
    /// Short lowercase name
    pub const fn name(self) -> &'static str {
        match self {
            SourceId::Usb => "usb",
            SourceId::Uart => "uart",
            SourceId::UsbCdc => "usb_cdc",
            SourceId::UsbMsc => "usb_msc",
            SourceId::MscButton => "msc_button",
            SourceId::LineSensor => "line_sensor",
            SourceId::LineSensorWindow => "line_sensor_window",
            SourceId::LidarCoord => "lidar_coord",
            SourceId::LidarIo => "lidar_io",
            SourceId::Battery => "battery",
            SourceId::Ultrasonic => "ultrasonic",
            SourceId::Rest => "rest",
            SourceId::PoolTest => "pool_test",
            SourceId::Undefined => "undefined",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of message destinations
///
/// Iteration always yields targets in ascending [`TargetId`] order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetSet(u32);

impl TargetSet {
    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every known target
    pub const fn all() -> Self {
        Self((1u32 << TARGET_COUNT) - 1)
    }

    /// A set holding exactly one target
    pub const fn single(target: TargetId) -> Self {
        Self(target.bit())
    }

    /// Add a target, returning the updated set
    pub const fn with(self, target: TargetId) -> Self {
        Self(self.0 | target.bit())
    }

    /// Add a target in place
    pub fn insert(&mut self, target: TargetId) {
        self.0 |= target.bit();
    }

    /// Remove a target in place
    pub fn remove(&mut self, target: TargetId) {
        self.0 &= !target.bit();
    }

    pub const fn contains(self, target: TargetId) -> bool {
        self.0 & target.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Raw bitmask, bit `n` set for `TargetId` index `n`
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Iterate members in ascending order
    pub fn iter(self) -> TargetSetIter {
        TargetSetIter { remaining: self.0 }
    }
}

impl fmt::Debug for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl From<TargetId> for TargetSet {
    fn from(target: TargetId) -> Self {
        Self::single(target)
    }
}

impl FromIterator<TargetId> for TargetSet {
    fn from_iter<I: IntoIterator<Item = TargetId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), TargetSet::with)
    }
}

impl<const N: usize> From<[TargetId; N]> for TargetSet {
    fn from(targets: [TargetId; N]) -> Self {
        targets.into_iter().collect()
    }
}

impl From<&[TargetId]> for TargetSet {
    fn from(targets: &[TargetId]) -> Self {
        targets.iter().copied().collect()
    }
}

impl IntoIterator for TargetSet {
    type Item = TargetId;
    type IntoIter = TargetSetIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`TargetSet`]
#[derive(Debug, Clone)]
pub struct TargetSetIter {
    remaining: u32,
}

impl Iterator for TargetSetIter {
    type Item = TargetId;

    fn next(&mut self) -> Option<TargetId> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.remaining.trailing_zeros() as usize;
        self.remaining &= self.remaining - 1;
        TargetId::from_index(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.count_ones() as usize;
        (n, Some(n))
    }
}
