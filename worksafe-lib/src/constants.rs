// Wire constants shared by the wearable, relay and host

/// Device id field width in the radio header (10 bytes)
pub const DEVICE_ID_SIZE: usize = 10;

/// Radio header: device id + frame counter + packet type (13 bytes)
pub const RADIO_HEADER_SIZE: usize = DEVICE_ID_SIZE + 2 + 1;

/// Largest frame the radio will carry
pub const MAX_RADIO_FRAME_SIZE: usize = 255;

/// Realtime vitals payload size (10 bytes)
pub const REALTIME_PAYLOAD_SIZE: usize = 10;

/// ECG payload size: type + compressed strip + PQRST (65 bytes)
pub const ECG_PAYLOAD_SIZE: usize = 1 + COMPRESSED_ECG_SIZE + PQRST_SIZE;

/// Fall event payload size (45 bytes)
pub const FALL_EVENT_PAYLOAD_SIZE: usize = 45;

/// Compressed ECG samples carried per ECG payload
pub const COMPRESSED_ECG_SIZE: usize = 50;

/// PQRST feature block size (14 bytes)
pub const PQRST_SIZE: usize = 14;

/// Serial relay frame start marker
pub const RELAY_START: u8 = 0xAA;

/// Serial relay frame end marker
pub const RELAY_END: u8 = 0x55;

/// Serial relay framing overhead: start, length, rssi, snr, end
pub const RELAY_OVERHEAD: usize = 5;

/// Offset mapping signed RSSI (dBm) into an unsigned byte
pub const RSSI_OFFSET: i16 = 150;

/// Offset mapping signed SNR (dB) into an unsigned byte
pub const SNR_OFFSET: f32 = 20.0;

/// Time sync message markers: [0xFF][0xFE] ... [0xFD]
pub const TIME_SYNC_LEAD: u8 = 0xFF;
pub const TIME_SYNC_SECOND: u8 = 0xFE;
pub const TIME_SYNC_END: u8 = 0xFD;

/// Time sync message size (10 bytes)
pub const TIME_SYNC_SIZE: usize = 10;

/// Standard gravity (m/s²)
pub const GRAVITY: f32 = 9.80665;

/// Smallest tick interval used for derivatives (seconds)
pub const MIN_TICK_S: f32 = 0.01;

/// Temperature codec range (°C)
pub const TEMP_MIN_C: f32 = -20.0;
pub const TEMP_SPAN_C: f32 = 100.0;
