// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::bucket::Bucket;
use crate::error::Error;
use crate::histogram::Histogram;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

// Standard alphabet with '=' padding on encode; decode accepts either.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// Number of bytes needed for a big-endian count, 1..=8.
fn count_width(count: u64) -> usize {
    let bits = 64 - count.leading_zeros() as usize;
    core::cmp::max(1, (bits + 7) / 8)
}

impl Histogram {
    /// Serializes into the binary wire format: a big-endian `u16` number of
    /// entries, then per entry the bucket's `val` and `exp` bytes, a width
    /// tag, and `tag + 1` bytes of big-endian count. Buckets whose count is
    /// zero are omitted.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialize_estimate());
        let entries = self.bvs.iter().filter(|pair| pair.count != 0);
        let emitted = entries.clone().count() as u16;
        buf.extend_from_slice(&emitted.to_be_bytes());
        for pair in entries {
            let [val, exp] = pair.bucket.to_bytes();
            let width = count_width(pair.count);
            buf.push(val);
            buf.push(exp);
            buf.push((width - 1) as u8);
            buf.extend_from_slice(&pair.count.to_be_bytes()[8 - width..]);
        }
        buf
    }

    /// Returns the exact size in bytes that [`Histogram::serialize`] will
    /// produce.
    pub fn serialize_estimate(&self) -> usize {
        2 + self
            .bvs
            .iter()
            .filter(|pair| pair.count != 0)
            .map(|pair| 3 + count_width(pair.count))
            .sum::<usize>()
    }

    /// Replaces the contents of this histogram with the entries decoded from
    /// `buf`, skipping entries whose count is zero. Returns the number of
    /// bytes consumed.
    ///
    /// On malformed input (truncation, or a width tag above 7) the histogram
    /// is left empty.
    pub fn deserialize(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if buf.len() < 2 {
            self.reset_storage(0);
            return Err(Error::Deserialize);
        }
        let declared = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        self.reset_storage(declared);
        let mut pos = 2;
        for _ in 0..declared {
            if buf.len() < pos + 3 {
                self.reset_storage(0);
                return Err(Error::Deserialize);
            }
            let bucket = Bucket::from_bytes([buf[pos], buf[pos + 1]]);
            let tag = buf[pos + 2] as usize;
            if tag > 7 || buf.len() < pos + 3 + tag + 1 {
                self.reset_storage(0);
                return Err(Error::Deserialize);
            }
            let mut count = 0u64;
            for &byte in &buf[pos + 3..pos + 3 + tag + 1] {
                count = (count << 8) | byte as u64;
            }
            pos += 3 + tag + 1;
            if count == 0 {
                continue;
            }
            // entries arrive in bucket order, so this is normally a pure
            // append; out of order input falls back to a sorted insert
            if !self.try_append(bucket, count) {
                self.insert_bucket(bucket, count);
            }
        }
        Ok(pos)
    }

    /// Serializes into the binary wire format and encodes it as base64.
    pub fn serialize_b64(&self) -> String {
        BASE64.encode(self.serialize())
    }

    /// Returns an upper bound on the length of [`Histogram::serialize_b64`].
    pub fn serialize_b64_estimate(&self) -> usize {
        // 4 base64 characters carry 3 bytes
        4 * (self.serialize_estimate() / 3 + 1)
    }

    /// Decodes a base64 envelope and replaces the contents of this histogram
    /// with the result. Embedded ASCII whitespace is accepted. Fails unless
    /// every decoded byte is consumed.
    pub fn deserialize_b64(&mut self, input: &str) -> Result<usize, Error> {
        let cleaned: Vec<u8> = input
            .bytes()
            .filter(|byte| !byte.is_ascii_whitespace())
            .collect();
        let decoded = BASE64.decode(&cleaned).map_err(|_| Error::Deserialize)?;
        let read = self.deserialize(&decoded)?;
        if read != decoded.len() {
            self.reset_storage(0);
            return Err(Error::Deserialize);
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn build(values: &[f64]) -> Histogram {
        let mut histogram = Histogram::new();
        for &value in values {
            histogram.insert(value, 1);
        }
        histogram
    }

    #[test]
    fn known_bytes() {
        let mut histogram = Histogram::new();
        histogram.insert(1.0, 1);
        assert_eq!(histogram.serialize(), vec![0x00, 0x01, 10, 0, 0, 1]);

        let mut histogram = Histogram::new();
        histogram.insert(1.0, 0x1234);
        assert_eq!(histogram.serialize(), vec![0x00, 0x01, 10, 0, 1, 0x12, 0x34]);

        let mut histogram = Histogram::new();
        histogram.insert(-1.0, u64::MAX);
        let val = (-10i8) as u8;
        assert_eq!(
            histogram.serialize(),
            vec![0x00, 0x01, val, 0, 7, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn empty_histogram() {
        let histogram = Histogram::new();
        assert_eq!(histogram.serialize(), vec![0, 0]);
        assert_eq!(histogram.serialize_estimate(), 2);

        let mut decoded = Histogram::new();
        assert_eq!(decoded.deserialize(&[0, 0]), Ok(2));
        assert!(decoded.is_empty());
    }

    #[test]
    fn round_trip_drops_zero_counts() {
        // build, clear, rebuild one short: the 13.0 bucket keeps a zero count
        let values = [0.123, 0.0, 0.43, 0.41, 0.415, 0.2201, 0.3201, 0.125, 0.13, 13.0];
        let mut input = build(&values);
        assert_eq!(input.sample_count(), 10);
        input.clear();
        assert_eq!(input.sample_count(), 0);
        for &value in &values[..9] {
            input.insert(value, 1);
        }
        assert_eq!(input.sample_count(), 9);

        let bytes = input.serialize();
        assert_eq!(bytes.len(), input.serialize_estimate());
        let mut output = Histogram::new();
        assert_eq!(output.deserialize(&bytes), Ok(bytes.len()));

        assert!(output.bucket_count() < input.bucket_count());
        let nonzero: Vec<_> = input.iter().filter(|(_, count)| *count != 0).collect();
        let decoded: Vec<_> = output.iter().collect();
        assert_eq!(nonzero, decoded);
    }

    #[test]
    fn round_trip_preserves_fast_target() {
        let source = build(&[1.0, 2.0, 3.0, -1.0]);
        let bytes = source.serialize();
        let mut target = Histogram::new_fast();
        target.deserialize(&bytes).unwrap();
        assert_eq!(target, source);
        // the rebuilt index must still resolve repeat inserts
        target.insert(2.0, 1);
        assert_eq!(target.sample_count(), 5);
    }

    #[test]
    fn deserialize_replaces_contents() {
        let bytes = build(&[5.0]).serialize();
        let mut target = build(&[1.0, 2.0]);
        target.deserialize(&bytes).unwrap();
        assert_eq!(target.bucket_count(), 1);
        assert_eq!(target.sample_count(), 1);
    }

    #[test]
    fn malformed_input() {
        let mut histogram = Histogram::new();
        assert_eq!(histogram.deserialize(&[]), Err(Error::Deserialize));
        assert_eq!(histogram.deserialize(&[0]), Err(Error::Deserialize));
        // header declares an entry that is not there
        assert_eq!(histogram.deserialize(&[0, 1]), Err(Error::Deserialize));
        // truncated count field
        assert_eq!(
            histogram.deserialize(&[0, 1, 10, 0, 3, 1]),
            Err(Error::Deserialize)
        );
        // width tag out of range
        assert_eq!(
            histogram.deserialize(&[0, 1, 10, 0, 8, 1, 1, 1, 1, 1, 1, 1, 1, 1]),
            Err(Error::Deserialize)
        );
        // a failed read leaves the histogram empty
        let mut histogram = build(&[1.0]);
        assert!(histogram.deserialize(&[0, 1, 10]).is_err());
        assert!(histogram.is_empty());
    }

    #[test]
    fn b64_round_trip() {
        let mut histogram = Histogram::new();
        histogram.insert(1.0, 1);
        assert_eq!(histogram.serialize_b64(), "AAEKAAAB");

        let source = build(&[0.25, 1.0, 1.0, 100.0, -2.5]);
        let encoded = source.serialize_b64();
        assert!(encoded.len() <= source.serialize_b64_estimate());
        let mut decoded = Histogram::new();
        assert!(decoded.deserialize_b64(&encoded).is_ok());
        assert_eq!(decoded, source);
    }

    #[test]
    fn b64_accepts_whitespace() {
        let mut decoded = Histogram::new();
        assert!(decoded.deserialize_b64(" AAEK\tAAAB\n").is_ok());
        assert_eq!(decoded.sample_count(), 1);
        assert_eq!(decoded.get(0), Some((1.0, 1)));
    }

    #[test]
    fn b64_rejects_garbage() {
        let mut decoded = Histogram::new();
        assert_eq!(decoded.deserialize_b64(""), Err(Error::Deserialize));
        assert_eq!(decoded.deserialize_b64("!!!!"), Err(Error::Deserialize));
        // valid base64, but trailing bytes beyond the declared entries
        let mut bytes = build(&[1.0]).serialize();
        bytes.push(0xab);
        let with_extra = BASE64.encode(&bytes);
        assert_eq!(
            decoded.deserialize_b64(&with_extra),
            Err(Error::Deserialize)
        );
        assert!(decoded.is_empty());
    }
}
