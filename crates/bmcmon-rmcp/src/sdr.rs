//! Full Sensor Record parsing.

use bmcmon_session::{
    AnalogDataFormat, EntityId, FullSensorRecord, SensorType, SensorUnit,
};

/// SDR record type for a Full Sensor Record.
pub const RECORD_TYPE_FULL: u8 = 0x01;

/// Minimum length of the fixed part of a full record, up to and including
/// the ID string type/length byte.
const MIN_FULL_RECORD: usize = 48;

/// Parses one complete SDR record (header included). Returns `None` for
/// record types other than Full Sensor Record, or for truncated records.
pub fn parse_full_record(record: &[u8]) -> Option<FullSensorRecord> {
    if record.len() < MIN_FULL_RECORD {
        return None;
    }
    if record[3] != RECORD_TYPE_FULL {
        return None;
    }

    let id_len = usize::from(record[47] & 0x1f);
    let id_bytes = record.get(48..48 + id_len).unwrap_or(&[]);

    Some(FullSensorRecord {
        sensor_number: record[7],
        entity: EntityId::from_raw(record[8]),
        instance: record[9] & 0x7f,
        sensor_type: SensorType::from_raw(record[12]),
        analog_format: AnalogDataFormat::from_raw(record[20] >> 6),
        base_unit: SensorUnit::from_raw(record[21]),
        linearisation: record[23] & 0x7f,
        m: tc10(record[24], record[25]),
        b: tc10(record[26], record[27]),
        b_exp: tc4(record[29] & 0x0f),
        r_exp: tc4(record[29] >> 4),
        id: String::from_utf8_lossy(id_bytes).into_owned(),
    })
}

/// 10-bit two's complement value split across a whole byte and the top two
/// bits of the next.
fn tc10(ls: u8, ms: u8) -> i16 {
    let value = (u16::from(ms & 0xc0) << 2) | u16::from(ls);
    if value & 0x200 != 0 {
        (value | 0xfc00) as i16
    } else {
        value as i16
    }
}

/// 4-bit two's complement value.
fn tc4(nibble: u8) -> i8 {
    if nibble & 0x08 != 0 {
        (nibble | 0xf0) as i8
    } else {
        nibble as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds the byte form of a full record the same way the parser reads
    /// it, so layout changes fail loudly.
    fn build_record(
        sensor_number: u8,
        entity: u8,
        instance: u8,
        sensor_type: u8,
        base_unit: u8,
        m: i16,
        r_exp: i8,
        id: &str,
    ) -> Vec<u8> {
        let mut record = vec![0u8; 48];
        record[0] = 0x01; // record id
        record[2] = 0x51; // SDR version
        record[3] = RECORD_TYPE_FULL;
        record[4] = (43 + id.len()) as u8;
        record[7] = sensor_number;
        record[8] = entity;
        record[9] = instance;
        record[12] = sensor_type;
        record[20] = 0x00; // unsigned analog format
        record[21] = base_unit;
        record[23] = 0x00; // linear
        record[24] = (m & 0xff) as u8;
        record[25] = ((m >> 2) & 0xc0) as u8;
        record[29] = ((r_exp as u8) << 4) & 0xf0;
        record[47] = 0xc0 | id.len() as u8;
        record.extend_from_slice(id.as_bytes());
        record
    }

    #[test]
    fn parses_a_temperature_record() {
        let record = build_record(0x30, 0x03, 1, 0x01, 0x01, 1, 0, "CPU1 Temp");
        let parsed = parse_full_record(&record).unwrap();
        assert_eq!(parsed.sensor_number, 0x30);
        assert_eq!(parsed.entity, EntityId::Processor);
        assert_eq!(parsed.instance, 1);
        assert_eq!(parsed.sensor_type, SensorType::Temperature);
        assert_eq!(parsed.base_unit, SensorUnit::Celsius);
        assert_eq!(parsed.m, 1);
        assert_eq!(parsed.r_exp, 0);
        assert_eq!(parsed.id, "CPU1 Temp");
    }

    #[test]
    fn parses_a_wattage_record_with_scaling() {
        let record = build_record(0x60, 0x0a, 2, 0x0b, 0x06, 4, -1, "PSU2 Power");
        let parsed = parse_full_record(&record).unwrap();
        assert_eq!(parsed.entity, EntityId::PowerSupply);
        assert_eq!(parsed.base_unit, SensorUnit::Watts);
        assert_eq!(parsed.m, 4);
        assert_eq!(parsed.r_exp, -1);
    }

    #[test]
    fn rejects_other_record_types() {
        let mut record = build_record(0x30, 0x03, 1, 0x01, 0x01, 1, 0, "x");
        record[3] = 0x02; // compact sensor record
        assert!(parse_full_record(&record).is_none());
    }

    #[test]
    fn rejects_truncated_records() {
        assert!(parse_full_record(&[0u8; 20]).is_none());
    }

    #[test]
    fn negative_m_survives_the_split_encoding() {
        let mut record = build_record(0x30, 0x03, 1, 0x01, 0x01, 0, 0, "x");
        // -2 as 10-bit two's complement: 0x3fe
        record[24] = 0xfe;
        record[25] = 0xc0;
        let parsed = parse_full_record(&record).unwrap();
        assert_eq!(parsed.m, -2);
    }

    #[test]
    fn tc4_sign_extends() {
        assert_eq!(tc4(0x0f), -1);
        assert_eq!(tc4(0x07), 7);
        assert_eq!(tc4(0x08), -8);
    }
}
