//! Intel-HEX image files.
//!
//! Parses DATA, EOF, EXTENDED_SEGMENT_ADDRESS, EXTENDED_LINEAR_ADDRESS and
//! START_LINEAR_ADDRESS records, merging DATA records into contiguous
//! sections. Emission produces one extended-linear-address record per
//! 64 KiB segment followed by 16-byte DATA lines.

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const RECORD_EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
const RECORD_START_LINEAR_ADDRESS: u8 = 0x05;

const DATA_LINE_BYTES: usize = 16;
const SEGMENT_SIZE: u32 = 0x1_0000;

/// One contiguous span of image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub start_address: u32,
    pub data: Vec<u8>,
}

/// A parsed or assembled Intel-HEX image.
#[derive(Debug, Clone, Default)]
pub struct HexFile {
    sections: Vec<Section>,
    start_linear_address: Option<u32>,
}

impl HexFile {
    /// Build an image from a single contiguous section.
    pub fn from_section(start_address: u32, data: Vec<u8>) -> Self {
        HexFile {
            sections: vec![Section {
                start_address,
                data,
            }],
            start_linear_address: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, HexFileError> {
        let mut file = HexFile::default();
        let mut address_offset = 0u32;

        for (index, line) in input.lines().enumerate() {
            let line_number = index + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record = parse_record(line, line_number)?;
            match record.kind {
                RECORD_DATA => {
                    let full_address = address_offset.wrapping_add(record.address as u32);
                    file.append_data(full_address, &record.data);
                }
                RECORD_EOF => return Ok(file),
                RECORD_EXTENDED_SEGMENT_ADDRESS => {
                    let segment = record_u16(&record, line_number)?;
                    address_offset = (segment as u32) * 16;
                }
                RECORD_EXTENDED_LINEAR_ADDRESS => {
                    let upper = record_u16(&record, line_number)?;
                    address_offset = (upper as u32) << 16;
                }
                RECORD_START_LINEAR_ADDRESS => {
                    if record.data.len() != 4 {
                        return Err(HexFileError::RecordLength { line: line_number });
                    }
                    file.start_linear_address =
                        Some(u32::from_be_bytes(record.data[..4].try_into().expect("4")));
                }
                kind => {
                    return Err(HexFileError::UnsupportedRecord {
                        line: line_number,
                        kind,
                    })
                }
            }
        }

        // No EOF record; accept what was read.
        Ok(file)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn start_linear_address(&self) -> Option<u32> {
        self.start_linear_address
    }

    pub fn set_start_linear_address(&mut self, address: Option<u32>) {
        self.start_linear_address = address;
    }

    /// Emit the image as Intel-HEX text.
    pub fn emit(&self) -> String {
        let mut out = String::new();

        for section in &self.sections {
            let mut pos = 0usize;
            while pos < section.data.len() {
                let segment_address = section.start_address + pos as u32;
                // Stay within the current 64 KiB segment.
                let segment_left = (SEGMENT_SIZE - (segment_address & 0xFFFF)) as usize;
                let chunk_len = segment_left.min(section.data.len() - pos);

                emit_record(
                    &mut out,
                    0,
                    RECORD_EXTENDED_LINEAR_ADDRESS,
                    &((segment_address >> 16) as u16).to_be_bytes(),
                );

                let base = (segment_address & 0xFFFF) as u16;
                let chunk = &section.data[pos..pos + chunk_len];
                for (offset, line) in chunk.chunks(DATA_LINE_BYTES).enumerate() {
                    emit_record(
                        &mut out,
                        base + (offset * DATA_LINE_BYTES) as u16,
                        RECORD_DATA,
                        line,
                    );
                }

                pos += chunk_len;
            }
        }

        if let Some(address) = self.start_linear_address {
            emit_record(&mut out, 0, RECORD_START_LINEAR_ADDRESS, &address.to_be_bytes());
        }
        emit_record(&mut out, 0, RECORD_EOF, &[]);

        out
    }

    fn append_data(&mut self, address: u32, data: &[u8]) {
        if let Some(section) = self
            .sections
            .iter_mut()
            .find(|s| s.start_address + s.data.len() as u32 == address)
        {
            section.data.extend_from_slice(data);
            return;
        }

        self.sections.push(Section {
            start_address: address,
            data: data.to_vec(),
        });
    }
}

struct Record {
    address: u16,
    kind: u8,
    data: Vec<u8>,
}

fn parse_record(line: &str, line_number: usize) -> Result<Record, HexFileError> {
    let body = line
        .strip_prefix(':')
        .ok_or(HexFileError::MissingColon { line: line_number })?;
    if body.len() % 2 != 0 {
        return Err(HexFileError::OddDigitCount { line: line_number });
    }

    let mut bytes = Vec::with_capacity(body.len() / 2);
    for pair in body.as_bytes().chunks_exact(2) {
        let hi = hex_digit(pair[0], line_number)?;
        let lo = hex_digit(pair[1], line_number)?;
        bytes.push(hi << 4 | lo);
    }

    // Record layout: count, address, type, data, checksum. The byte sum
    // including the two's-complement checksum is zero.
    if bytes.len() < 5 || bytes.len() != 5 + bytes[0] as usize {
        return Err(HexFileError::RecordLength { line: line_number });
    }
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        return Err(HexFileError::Checksum { line: line_number });
    }

    Ok(Record {
        address: u16::from_be_bytes([bytes[1], bytes[2]]),
        kind: bytes[3],
        data: bytes[4..bytes.len() - 1].to_vec(),
    })
}

fn record_u16(record: &Record, line_number: usize) -> Result<u16, HexFileError> {
    if record.data.len() != 2 {
        return Err(HexFileError::RecordLength { line: line_number });
    }
    Ok(u16::from_be_bytes([record.data[0], record.data[1]]))
}

fn hex_digit(byte: u8, line_number: usize) -> Result<u8, HexFileError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        _ => Err(HexFileError::BadHexDigit { line: line_number }),
    }
}

fn emit_record(out: &mut String, address: u16, kind: u8, data: &[u8]) {
    let mut bytes = Vec::with_capacity(5 + data.len());
    bytes.push(data.len() as u8);
    bytes.extend_from_slice(&address.to_be_bytes());
    bytes.push(kind);
    bytes.extend_from_slice(data);

    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    bytes.push((!sum).wrapping_add(1));

    out.push(':');
    for byte in bytes {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push('\n');
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexFileError {
    BadHexDigit { line: usize },
    Checksum { line: usize },
    MissingColon { line: usize },
    OddDigitCount { line: usize },
    RecordLength { line: usize },
    UnsupportedRecord { line: usize, kind: u8 },
}

impl core::fmt::Display for HexFileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HexFileError::BadHexDigit { line } => {
                write!(f, "invalid record on line {line}: non-hex character")
            }
            HexFileError::Checksum { line } => {
                write!(f, "invalid record on line {line}: checksum mismatch")
            }
            HexFileError::MissingColon { line } => {
                write!(f, "invalid record on line {line}: does not begin with ':'")
            }
            HexFileError::OddDigitCount { line } => {
                write!(f, "invalid record on line {line}: odd number of hex digits")
            }
            HexFileError::RecordLength { line } => {
                write!(f, "invalid record on line {line}: length does not match byte count")
            }
            HexFileError::UnsupportedRecord { line, kind } => {
                write!(f, "invalid record on line {line}: unsupported type {kind:#04x}")
            }
        }
    }
}

impl std::error::Error for HexFileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_small_known_file() {
        // Two data lines at 0x0800F000 upward, then EOF.
        let input = ":020000040800F2\n\
                     :10F00000000102030405060708090A0B0C0D0E0F88\n\
                     :04F0100010111213B6\n\
                     :00000001FF\n";

        let file = HexFile::parse(input).unwrap();
        assert_eq!(file.sections().len(), 1);

        let section = &file.sections()[0];
        assert_eq!(section.start_address, 0x0800_F000);
        assert_eq!(section.data.len(), 20);
        assert_eq!(section.data[..4], [0x00, 0x01, 0x02, 0x03]);
        assert_eq!(section.data[16..], [0x10, 0x11, 0x12, 0x13]);
    }

    #[test]
    fn emit_parse_round_trip() {
        let data: Vec<u8> = (0u32..70_000).map(|i| (i % 253) as u8).collect();
        let mut file = HexFile::from_section(0x0801_FFF0, data.clone());
        file.set_start_linear_address(Some(0x0800_0000));

        let text = file.emit();
        let parsed = HexFile::parse(&text).unwrap();

        assert_eq!(parsed.sections().len(), 1);
        assert_eq!(parsed.sections()[0].start_address, 0x0801_FFF0);
        assert_eq!(parsed.sections()[0].data, data);
        assert_eq!(parsed.start_linear_address(), Some(0x0800_0000));
    }

    #[test]
    fn emitted_lines_carry_correct_checksums() {
        let file = HexFile::from_section(0, vec![0xFF; 8]);
        let text = file.emit();

        for line in text.lines() {
            let bytes: Vec<u8> = (1..line.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&line[i..i + 2], 16).unwrap())
                .collect();
            let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
            assert_eq!(sum, 0, "line {line:?}");
        }
    }

    #[test]
    fn data_lines_are_sixteen_bytes() {
        let file = HexFile::from_section(0x1000, vec![0xAB; 40]);
        let text = file.emit();

        let data_lines: Vec<&str> = text
            .lines()
            .filter(|l| &l[7..9] == "00")
            .collect();
        assert_eq!(data_lines.len(), 3);
        // 16 data bytes make a 21-byte record, 43 characters with the colon.
        assert_eq!(data_lines[0].len(), 1 + 2 * 21);
        assert!(data_lines[0].starts_with(":10100000"));
        assert!(data_lines[2].starts_with(":08102000"));
    }

    #[test]
    fn extended_segment_records_offset_by_sixteen() {
        let input = ":020000021000EC\n\
                     :01000000AA55\n\
                     :00000001FF\n";

        let file = HexFile::parse(input).unwrap();
        assert_eq!(file.sections()[0].start_address, 0x0001_0000);
        assert_eq!(file.sections()[0].data, [0xAA]);
    }

    #[test]
    fn merges_adjacent_data_into_one_section() {
        let file = HexFile::from_section(0x0800_0000, (0..100u8).collect());
        let parsed = HexFile::parse(&file.emit()).unwrap();
        assert_eq!(parsed.sections().len(), 1);
        assert_eq!(parsed.sections()[0].data.len(), 100);
    }

    #[test]
    fn bad_records_are_rejected_with_line_numbers() {
        assert_eq!(
            HexFile::parse("0000000001FF\n").unwrap_err(),
            HexFileError::MissingColon { line: 1 }
        );
        assert_eq!(
            HexFile::parse(":00000001F\n").unwrap_err(),
            HexFileError::OddDigitCount { line: 1 }
        );
        assert_eq!(
            HexFile::parse(":00000001GG\n").unwrap_err(),
            HexFileError::BadHexDigit { line: 1 }
        );
        // Checksum off by one.
        assert_eq!(
            HexFile::parse(":00000001FE\n").unwrap_err(),
            HexFileError::Checksum { line: 1 }
        );
        // Byte count does not match the line length.
        assert_eq!(
            HexFile::parse(":02000001FD\n").unwrap_err(),
            HexFileError::RecordLength { line: 1 }
        );
        // START_SEGMENT_ADDRESS is not supported.
        assert_eq!(
            HexFile::parse(":0400000312345678E5\n").unwrap_err(),
            HexFileError::UnsupportedRecord { line: 1, kind: 3 }
        );
    }
}
