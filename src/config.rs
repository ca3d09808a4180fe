//! QPACK configuration parameters.
//!
//! Two of these are exchanged in HTTP/3 SETTINGS (RFC 9204 Section 5);
//! the string length bound is a local anti-DoS limit.

/// Tunable limits for one endpoint's QPACK state.
#[derive(Debug, Clone, Copy)]
pub struct QpackSettings {
    /// Upper bound accepted via Set Dynamic Table Capacity, in bytes.
    ///
    /// Advertised as SETTINGS_QPACK_MAX_TABLE_CAPACITY. A peer instruction
    /// raising the capacity above this value is a connection error.
    pub maximum_dynamic_table_capacity: u64,

    /// Maximum number of request streams that may be simultaneously blocked
    /// on pending dynamic table insertions.
    ///
    /// Advertised as SETTINGS_QPACK_BLOCKED_STREAMS.
    pub maximum_blocked_streams: u64,

    /// Longest string literal the decoder will accept, counting bytes on
    /// the wire. Longer literals fail decoding before any allocation.
    pub maximum_string_length: u64,
}

impl Default for QpackSettings {
    fn default() -> Self {
        Self {
            maximum_dynamic_table_capacity: 4096,
            maximum_blocked_streams: 100,
            maximum_string_length: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = QpackSettings::default();
        assert_eq!(settings.maximum_dynamic_table_capacity, 4096);
        assert_eq!(settings.maximum_blocked_streams, 100);
        assert_eq!(settings.maximum_string_length, 1024 * 1024);
    }
}
