//! Datapoint wire codec for the vendor's proprietary cluster.
//!
//! Report and request payloads share one layout:
//!
//! ```text
//! [seq: u16 BE] { [dp: u8][type: u8][len: u16 BE][data: len] }+
//! ```
//!
//! Decoding is lazy: [`ReportFrame::datapoints`] yields records one at a time
//! and stops at the first malformed record, so records that precede a broken
//! one are still delivered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use dpbridge_core::FrameError;

/// Proprietary cluster id (`0xEF00`).
pub const PROPRIETARY_CLUSTER: u16 = 61184;

/// Standard power-configuration cluster.
pub const POWER_CONFIG_CLUSTER: u16 = 0x0001;

/// Command ids on the proprietary cluster.
pub mod commands {
    /// Host → device: set datapoints.
    pub const DATA_REQUEST: u8 = 0x00;
    /// Device → host: answer to a request or query.
    pub const DATA_RESPONSE: u8 = 0x01;
    /// Device → host: unsolicited report.
    pub const DATA_REPORT: u8 = 0x02;
    /// Host → device: ask for every datapoint.
    pub const DATA_QUERY: u8 = 0x03;
    /// Either direction: time synchronisation.
    pub const TIME_SYNC: u8 = 0x24;

    /// Commands whose payload carries datapoint records.
    pub fn carries_datapoints(command: u8) -> bool {
        matches!(command, DATA_RESPONSE | DATA_REPORT)
    }
}

/// Numeric datapoint identifier.
pub type DatapointId = u8;

/// Wire type tag of a datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DpType {
    Raw = 0x00,
    Bool = 0x01,
    Value = 0x02,
    String = 0x03,
    Enum = 0x04,
    Bitmap = 0x05,
}

impl TryFrom<u8> for DpType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Self::Raw),
            0x01 => Ok(Self::Bool),
            0x02 => Ok(Self::Value),
            0x03 => Ok(Self::String),
            0x04 => Ok(Self::Enum),
            0x05 => Ok(Self::Bitmap),
            other => Err(other),
        }
    }
}

/// Typed datapoint payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DpValue {
    Raw(Vec<u8>),
    Bool(bool),
    Value(i32),
    String(String),
    Enum(u8),
    Bitmap(u32),
}

impl DpValue {
    pub fn dp_type(&self) -> DpType {
        match self {
            Self::Raw(_) => DpType::Raw,
            Self::Bool(_) => DpType::Bool,
            Self::Value(_) => DpType::Value,
            Self::String(_) => DpType::String,
            Self::Enum(_) => DpType::Enum,
            Self::Bitmap(_) => DpType::Bitmap,
        }
    }

    /// Integer view of scalar payloads. `Raw` and `String` have none.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Value(v) => Some(i64::from(*v)),
            Self::Enum(v) => Some(i64::from(*v)),
            Self::Bitmap(v) => Some(i64::from(*v)),
            Self::Raw(_) | Self::String(_) => None,
        }
    }

    fn encode_data(&self) -> Vec<u8> {
        match self {
            Self::Raw(bytes) => bytes.clone(),
            Self::Bool(v) => vec![u8::from(*v)],
            Self::Value(v) => v.to_be_bytes().to_vec(),
            Self::String(s) => s.as_bytes().to_vec(),
            Self::Enum(v) => vec![*v],
            Self::Bitmap(v) => v.to_be_bytes().to_vec(),
        }
    }

    fn decode(dp: DatapointId, kind: DpType, data: &[u8]) -> Result<Self, FrameError> {
        let bad_len = || FrameError::BadLength { dp, len: data.len() };
        match kind {
            DpType::Raw => Ok(Self::Raw(data.to_vec())),
            DpType::Bool => Ok(Self::Bool(data.first().is_some_and(|b| *b != 0))),
            DpType::Value => {
                if data.is_empty() || data.len() > 4 {
                    return Err(bad_len());
                }
                // Sign-extend short big-endian integers.
                let fill = if data[0] & 0x80 != 0 { 0xff } else { 0x00 };
                let mut word = [fill; 4];
                word[4 - data.len()..].copy_from_slice(data);
                Ok(Self::Value(i32::from_be_bytes(word)))
            }
            DpType::String => {
                let text = String::from_utf8_lossy(data).replace('\0', "");
                Ok(Self::String(text))
            }
            DpType::Enum => data.first().map(|v| Self::Enum(*v)).ok_or_else(bad_len),
            DpType::Bitmap => match data.len() {
                1 => Ok(Self::Bitmap(u32::from(data[0]))),
                2 => Ok(Self::Bitmap(u32::from(u16::from_be_bytes([data[0], data[1]])))),
                4 => Ok(Self::Bitmap(u32::from_be_bytes([
                    data[0], data[1], data[2], data[3],
                ]))),
                _ => Err(bad_len()),
            },
        }
    }
}

impl std::fmt::Display for DpValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Self::Bool(v) => write!(f, "{}", v),
            Self::Value(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{:?}", v),
            Self::Enum(v) => write!(f, "enum({})", v),
            Self::Bitmap(v) => write!(f, "0x{:x}", v),
        }
    }
}

/// One datapoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datapoint {
    pub dp: DatapointId,
    #[serde(flatten)]
    pub value: DpValue,
}

impl Datapoint {
    pub fn new(dp: DatapointId, value: DpValue) -> Self {
        Self { dp, value }
    }

    pub fn dp_type(&self) -> DpType {
        self.value.dp_type()
    }
}

/// A decoded report payload: sequence number plus lazily parsed records.
#[derive(Debug, Clone, Copy)]
pub struct ReportFrame<'a> {
    seq: u16,
    body: &'a [u8],
}

impl<'a> ReportFrame<'a> {
    /// Split the sequence number off a payload.
    pub fn parse(payload: &'a [u8]) -> Result<Self, FrameError> {
        if payload.len() < 2 {
            return Err(FrameError::TooShort(payload.len()));
        }
        let mut buf = payload;
        let seq = buf.get_u16();
        Ok(Self { seq, body: buf })
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn datapoints(&self) -> DatapointIter<'a> {
        DatapointIter {
            buf: self.body,
            offset: 2,
            done: false,
        }
    }

    /// Collect every well-formed record, plus the error that stopped decoding.
    pub fn collect_lossy(&self) -> (Vec<Datapoint>, Option<FrameError>) {
        let mut out = Vec::new();
        for record in self.datapoints() {
            match record {
                Ok(dp) => out.push(dp),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }
}

/// Iterator over the records of a [`ReportFrame`].
#[derive(Debug, Clone)]
pub struct DatapointIter<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl DatapointIter<'_> {
    fn next_record(&mut self) -> Result<Datapoint, FrameError> {
        if self.buf.len() < 4 {
            return Err(FrameError::TooShort(self.buf.len()));
        }
        let dp = self.buf.get_u8();
        if dp == 0 {
            return Err(FrameError::ZeroDatapoint {
                offset: self.offset,
            });
        }
        let raw_kind = self.buf.get_u8();
        let kind = DpType::try_from(raw_kind).map_err(|kind| FrameError::UnknownType { dp, kind })?;
        let len = usize::from(self.buf.get_u16());
        if len > self.buf.len() {
            return Err(FrameError::Truncated {
                dp,
                declared: len,
                available: self.buf.len(),
            });
        }
        let (data, rest) = self.buf.split_at(len);
        self.buf = rest;
        self.offset += 4 + len;
        Ok(Datapoint::new(dp, DpValue::decode(dp, kind, data)?))
    }
}

impl Iterator for DatapointIter<'_> {
    type Item = Result<Datapoint, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.buf.is_empty() {
            return None;
        }
        let record = self.next_record();
        if record.is_err() {
            self.done = true;
        }
        Some(record)
    }
}

impl std::iter::FusedIterator for DatapointIter<'_> {}

/// Build a payload carrying `datapoints`, used for `DATA_REQUEST` writes and
/// for synthesising reports.
///
/// Fails when a value does not fit the 16-bit record length.
pub fn encode_datapoints(seq: u16, datapoints: &[Datapoint]) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(2 + datapoints.len() * 8);
    buf.put_u16(seq);
    for dp in datapoints {
        let data = dp.value.encode_data();
        let len = u16::try_from(data.len()).map_err(|_| FrameError::Oversize {
            dp: dp.dp,
            len: data.len(),
        })?;
        buf.put_u8(dp.dp);
        buf.put_u8(dp.dp_type() as u8);
        buf.put_u16(len);
        buf.put_slice(&data);
    }
    Ok(buf.freeze())
}

/// Build a `DATA_QUERY` payload asking for a single datapoint: one empty
/// raw record.
pub fn encode_datapoint_query(seq: u16, dp: DatapointId) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(seq);
    buf.put_u8(dp);
    buf.put_u8(DpType::Raw as u8);
    buf.put_u16(0);
    buf.freeze()
}

/// Build a `DATA_QUERY` payload (sequence number only).
pub fn encode_query(seq: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(seq);
    buf.freeze()
}

/// Build a `TIME_SYNC` answer: `[seq: u16][utc: u32][local: u32]`.
pub fn encode_time_sync(seq: u16, now: DateTime<Utc>) -> Bytes {
    let utc = now.timestamp();
    let offset = i64::from(now.with_timezone(&Local).offset().local_minus_utc());
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u16(seq);
    buf.put_u32(utc.clamp(0, i64::from(u32::MAX)) as u32);
    buf.put_u32((utc + offset).clamp(0, i64::from(u32::MAX)) as u32);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_value() {
        // seq=0x0001, dp=1 value 215
        let payload = [0x00, 0x01, 0x01, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0xd7];
        let frame = ReportFrame::parse(&payload).unwrap();
        assert_eq!(frame.seq(), 1);
        let dps: Vec<_> = frame.datapoints().collect::<Result<_, _>>().unwrap();
        assert_eq!(dps, vec![Datapoint::new(1, DpValue::Value(215))]);
    }

    #[test]
    fn test_decode_multiple_records() {
        let payload = encode_datapoints(
            7,
            &[
                Datapoint::new(1, DpValue::Value(-45)),
                Datapoint::new(2, DpValue::Bool(true)),
                Datapoint::new(3, DpValue::Enum(2)),
                Datapoint::new(4, DpValue::String("ok".into())),
                Datapoint::new(5, DpValue::Bitmap(0x0102_0304)),
                Datapoint::new(6, DpValue::Raw(vec![9, 8])),
            ],
        )
        .unwrap();
        let frame = ReportFrame::parse(&payload).unwrap();
        let (dps, err) = frame.collect_lossy();
        assert!(err.is_none());
        assert_eq!(dps.len(), 6);
        assert_eq!(dps[0].value, DpValue::Value(-45));
        assert_eq!(dps[4].value, DpValue::Bitmap(0x0102_0304));
    }

    #[test]
    fn test_short_value_sign_extension() {
        let payload = [0x00, 0x00, 0x01, 0x02, 0x00, 0x02, 0xff, 0xfe];
        let frame = ReportFrame::parse(&payload).unwrap();
        let dp = frame.datapoints().next().unwrap().unwrap();
        assert_eq!(dp.value, DpValue::Value(-2));
    }

    #[test]
    fn test_string_strips_nul() {
        let payload = [0x00, 0x00, 0x09, 0x03, 0x00, 0x03, b'h', b'i', 0x00];
        let frame = ReportFrame::parse(&payload).unwrap();
        let dp = frame.datapoints().next().unwrap().unwrap();
        assert_eq!(dp.value, DpValue::String("hi".into()));
    }

    #[test]
    fn test_truncated_record_keeps_earlier_records() {
        let mut payload = encode_datapoints(1, &[Datapoint::new(1, DpValue::Bool(true))])
            .unwrap()
            .to_vec();
        // dp 2, value type, declares 4 bytes, provides 1
        payload.extend_from_slice(&[0x02, 0x02, 0x00, 0x04, 0x01]);
        let frame = ReportFrame::parse(&payload).unwrap();
        let (dps, err) = frame.collect_lossy();
        assert_eq!(dps.len(), 1);
        assert_eq!(
            err,
            Some(FrameError::Truncated {
                dp: 2,
                declared: 4,
                available: 1
            })
        );
    }

    #[test]
    fn test_malformed_records() {
        let unknown_type = [0x00, 0x00, 0x01, 0x09, 0x00, 0x00];
        let frame = ReportFrame::parse(&unknown_type).unwrap();
        assert_eq!(
            frame.datapoints().next().unwrap(),
            Err(FrameError::UnknownType { dp: 1, kind: 9 })
        );

        let zero_dp = [0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x01];
        let frame = ReportFrame::parse(&zero_dp).unwrap();
        assert!(matches!(
            frame.datapoints().next(),
            Some(Err(FrameError::ZeroDatapoint { offset: 2 }))
        ));

        let bad_bitmap = [0x00, 0x00, 0x01, 0x05, 0x00, 0x03, 0x01, 0x02, 0x03];
        let frame = ReportFrame::parse(&bad_bitmap).unwrap();
        assert_eq!(
            frame.datapoints().next(),
            Some(Err(FrameError::BadLength { dp: 1, len: 3 }))
        );

        assert_eq!(ReportFrame::parse(&[0x01]).unwrap_err(), FrameError::TooShort(1));
    }

    #[test]
    fn test_iterator_fuses_after_error() {
        let payload = [0x00, 0x00, 0x01, 0x09, 0x00, 0x00, 0x02, 0x01, 0x00, 0x01, 0x01];
        let frame = ReportFrame::parse(&payload).unwrap();
        let mut iter = frame.datapoints();
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_empty_report_has_no_records() {
        let frame = ReportFrame::parse(&[0x00, 0x05]).unwrap();
        assert_eq!(frame.datapoints().count(), 0);
    }

    #[test]
    fn test_time_sync_layout() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let payload = encode_time_sync(3, now);
        assert_eq!(payload.len(), 10);
        assert_eq!(&payload[..2], &[0x00, 0x03]);
        assert_eq!(u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]), 1_700_000_000);
    }

    #[test]
    fn test_encode_rejects_value_longer_than_record_length() {
        let long = "x".repeat(usize::from(u16::MAX) + 1);
        let err = encode_datapoints(1, &[Datapoint::new(4, DpValue::String(long))]).unwrap_err();
        assert_eq!(err, FrameError::Oversize { dp: 4, len: 65_536 });

        let max = "x".repeat(usize::from(u16::MAX));
        let payload = encode_datapoints(1, &[Datapoint::new(4, DpValue::String(max))]).unwrap();
        assert_eq!(&payload[4..6], &[0xff, 0xff]);
    }

    #[test]
    fn test_datapoint_query_layout() {
        let payload = encode_datapoint_query(0x0102, 9);
        assert_eq!(&payload[..], &[0x01, 0x02, 0x09, 0x00, 0x00, 0x00]);
    }
}
