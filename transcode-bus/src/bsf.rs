//! Length-prefixed (AVCC/HVCC) to start-code (Annex B) rewriting for
//! H.264/HEVC stream copy.

use bytes::{Bytes, BytesMut};

use crate::packet::Packet;

/// Annex B start code (4-byte)
const START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

/// Check if the extradata indicates AVCC/HVCC format (needs conversion to Annex B).
///
/// Returns false if already in Annex B format or the format cannot be determined.
pub fn needs_annexb_conversion(extradata: &[u8]) -> bool {
    if extradata.len() < 7 || is_annexb_packet(extradata) {
        return false;
    }
    // configurationVersion = 1
    extradata[0] == 0x01
}

/// Check if packet data is in Annex B format by looking at the start codes.
pub fn is_annexb_packet(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    if data[0] == 0x00 && data[1] == 0x00 && data[2] == 0x00 && data[3] == 0x01 {
        return true;
    }
    data[0] == 0x00 && data[1] == 0x00 && data[2] == 0x01
}

/// Parameter sets and NAL length size from an H.264 `avcC` record.
fn parse_avcc_extradata(extradata: &[u8]) -> Option<(usize, Bytes)> {
    let length_size = (extradata.get(4)? & 0x03) as usize + 1;
    let mut out = BytesMut::new();
    let mut i = 5;
    let nb_sps = (extradata.get(i)? & 0x1f) as usize;
    i += 1;
    for _ in 0..nb_sps {
        i = copy_parameter_set(extradata, i, &mut out)?;
    }
    let nb_pps = *extradata.get(i)? as usize;
    i += 1;
    for _ in 0..nb_pps {
        i = copy_parameter_set(extradata, i, &mut out)?;
    }
    Some((length_size, out.freeze()))
}

fn copy_parameter_set(extradata: &[u8], at: usize, out: &mut BytesMut) -> Option<usize> {
    let len = u16::from_be_bytes([*extradata.get(at)?, *extradata.get(at + 1)?]) as usize;
    let data = extradata.get(at + 2..at + 2 + len)?;
    out.extend_from_slice(START_CODE);
    out.extend_from_slice(data);
    Some(at + 2 + len)
}

/// Rewrites copied packets from AVCC to Annex B, prefixing key frames with
/// the stream's parameter sets.
#[derive(Debug, Clone)]
pub struct AvccToAnnexB {
    length_size: usize,
    parameter_sets: Bytes,
}

impl AvccToAnnexB {
    /// Returns None when the stream is not length-prefixed.
    pub fn new(extradata: &[u8]) -> Option<Self> {
        if !needs_annexb_conversion(extradata) {
            return None;
        }
        let (length_size, parameter_sets) = parse_avcc_extradata(extradata).unwrap_or((4, Bytes::new()));
        Some(Self {
            length_size,
            parameter_sets,
        })
    }

    pub fn filter_packet(&self, packet: &Packet) -> Bytes {
        let data = &packet.data;
        if data.is_empty() || is_annexb_packet(data) {
            return data.clone();
        }
        let nals = convert_avcc_to_annexb(data, self.length_size);
        if packet.is_key && !self.parameter_sets.is_empty() {
            let mut out = BytesMut::with_capacity(self.parameter_sets.len() + nals.len());
            out.extend_from_slice(&self.parameter_sets);
            out.extend_from_slice(&nals);
            return out.freeze();
        }
        nals
    }
}

/// Converts AVCC (N-byte length + NAL) to Annex B (start code + NAL).
pub fn convert_avcc_to_annexb(avcc: &[u8], length_size: usize) -> Bytes {
    let mut out = BytesMut::new();
    let mut i = 0;
    while i + length_size <= avcc.len() {
        let len = avcc[i..i + length_size]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        i += length_size;
        if len == 0 || i + len > avcc.len() {
            break;
        }
        out.extend_from_slice(START_CODE);
        out.extend_from_slice(&avcc[i..i + len]);
        i += len;
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVCC: [u8; 19] = [
        0x01, 0x64, 0x00, 0x1f, 0xff, // version, profile, compat, level, length size 4
        0xe1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1f, // one SPS
        0x01, 0x00, 0x03, 0x68, 0xee, 0x3c, // one PPS
        0x00,
    ];

    #[test]
    fn test_is_annexb() {
        assert!(is_annexb_packet(&[0x00, 0x00, 0x00, 0x01, 0x67]));
        assert!(is_annexb_packet(&[0x00, 0x00, 0x01, 0x67]));
        assert!(!is_annexb_packet(&[0x01, 0x00, 0x00, 0x00]));
        assert!(!is_annexb_packet(&[0x00, 0x00]));
    }

    #[test]
    fn test_avcc_to_annexb() {
        // One NAL: length 4, then 4 bytes NAL
        let avcc = [0, 0, 0, 4, 0x65, 0x88, 0x81, 0x00];
        let out = convert_avcc_to_annexb(&avcc, 4);
        assert_eq!(
            &out[..],
            &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x81, 0x00][..]
        );
    }

    #[test]
    fn test_key_frames_get_parameter_sets() {
        let filter = AvccToAnnexB::new(&AVCC).unwrap();
        let key = Packet::new(0, vec![0, 0, 0, 2, 0x65, 0x88]).with_key(true);
        assert_eq!(
            &filter.filter_packet(&key)[..],
            &[
                0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1f, 0, 0, 0, 1, 0x68, 0xee, 0x3c, 0, 0, 0, 1, 0x65,
                0x88
            ][..]
        );
        let delta = Packet::new(0, vec![0, 0, 0, 2, 0x41, 0x9a]);
        assert_eq!(&filter.filter_packet(&delta)[..], &[0, 0, 0, 1, 0x41, 0x9a][..]);
    }

    #[test]
    fn test_annexb_extradata_needs_nothing() {
        assert!(AvccToAnnexB::new(&[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1f]).is_none());
        assert!(AvccToAnnexB::new(&[]).is_none());
    }
}
