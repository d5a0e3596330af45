use uuid::Uuid;

/**
 * How long (milliseconds) the device may stay silent before the connection is assumed lost.
 * The Rest pushes a feedback frame roughly every second while connected.
 */
pub const WATCHDOG_SILENCE: u64 = 5000;

/**
 * How often (milliseconds) to retry bringing up the adapter / scanning.
 */
pub const CONNECT_DELAY: u64 = 1000;

/**
 * How often (milliseconds) to poll the adapter for newly discovered peripherals.
 */
pub const SCAN_POLL_DELAY: u64 = 250;

/**
 * Default upper bound (milliseconds) for the connect handshake and for service discovery.
 */
pub const CONNECT_DEADLINE: u64 = 30_000;

/**
 * The service advertising the current device status.
 */
pub const ADVERTISING_SERVICE: Uuid = Uuid::from_u128(0x02260001_5efd_47eb_9c1a_de53f7a2b232);

/**
 * Read/notify characteristic carrying feedback frames.
 */
pub const FEEDBACK_CHARACTERISTIC: Uuid = Uuid::from_u128(0x02260002_5efd_47eb_9c1a_de53f7a2b232);

/**
 * The service accepting commands.
 */
pub const CONTROL_SERVICE: Uuid = Uuid::from_u128(0x02240001_5efd_47eb_9c1a_de53f7a2b232);

/**
 * Command characteristic (TX from our point of view).
 */
pub const CONTROL_TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x02240002_5efd_47eb_9c1a_de53f7a2b232);

pub const OPCODE_POWER: &str = "SI";
pub const OPCODE_VOLUME: &str = "SV";
pub const OPCODE_COLOR: &str = "SC";
pub const OPCODE_TRACK: &str = "SN";

/**
 * Section markers of a feedback frame: T(ime), C(olor), S(ound), P(ower).
 */
pub const MARKER_TIME: u8 = 0x54;
pub const MARKER_COLOR: u8 = 0x43;
pub const MARKER_SOUND: u8 = 0x53;
pub const MARKER_POWER: u8 = 0x50;

/**
 * Feedback frames shorter than this are rejected.
 */
pub const FEEDBACK_MIN_LEN: usize = 15;

/**
 * If any of these bits are set in the power byte the device is off.
 */
pub const POWER_OFF_MASK: u8 = 0xC0;
