//! Byte-stream reassembly for SOPAS-style telegrams.
//!
//! Telegram layout: `STX(4) LEN(4, big-endian u32) PAYLOAD(LEN) CHK(1, XOR)`.

const STX: [u8; 4] = [0x02, 0x02, 0x02, 0x02];

/// Reassembles a byte stream into complete, checksum-valid payloads.
///
/// The framer never drops an unknown-length slice on checksum failure: it
/// only advances past the bad STX (4 bytes) and retries, since a valid STX
/// may be hiding inside the remainder of a corrupted telegram.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds raw bytes and returns every complete, checksum-valid payload
    /// that can now be extracted. Tolerates split and coalesced UDP packets.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut payloads = Vec::new();
        while let Some(payload) = self.try_extract_one() {
            payloads.push(payload);
        }
        payloads
    }

    fn try_extract_one(&mut self) -> Option<Vec<u8>> {
        loop {
            let stx_pos = match find_stx(&self.buffer) {
                Some(pos) => pos,
                None => {
                    // No complete 4-byte STX in the buffer. Keep any trailing
                    // run of STX bytes (up to 3, since a run of 4 would have
                    // matched above) so a marker split across feed() calls
                    // still completes once the rest arrives.
                    let keep = self
                        .buffer
                        .iter()
                        .rev()
                        .take_while(|&&b| b == STX[0])
                        .count()
                        .min(STX.len() - 1);
                    let drain_to = self.buffer.len() - keep;
                    self.buffer.drain(..drain_to);
                    return None;
                }
            };
            if stx_pos > 0 {
                self.buffer.drain(..stx_pos);
            }

            if self.buffer.len() < 8 {
                return None;
            }

            let payload_len =
                u32::from_be_bytes(self.buffer[4..8].try_into().unwrap()) as usize;
            let total_len = 8 + payload_len + 1;
            if self.buffer.len() < total_len {
                return None;
            }

            let payload = self.buffer[8..8 + payload_len].to_vec();
            let checksum = self.buffer[8 + payload_len];
            let computed = payload.iter().fold(0u8, |acc, b| acc ^ b);

            if computed != checksum {
                self.buffer.drain(..4);
                continue;
            }

            self.buffer.drain(..total_len);
            return Some(payload);
        }
    }
}

fn find_stx(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    buf.windows(4).position(|w| w == STX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telegram(payload: &[u8]) -> Vec<u8> {
        let chk = payload.iter().fold(0u8, |acc, b| acc ^ b);
        let mut out = Vec::new();
        out.extend_from_slice(&STX);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out.push(chk);
        out
    }

    #[test]
    fn single_telegram_round_trip() {
        let mut framer = Framer::new();
        let out = framer.feed(&telegram(b"hello"));
        assert_eq!(out, vec![b"hello".to_vec()]);
    }

    #[test]
    fn split_across_feeds() {
        let mut framer = Framer::new();
        let bytes = telegram(b"split-me");
        let (a, b) = bytes.split_at(5);
        assert!(framer.feed(a).is_empty());
        let out = framer.feed(b);
        assert_eq!(out, vec![b"split-me".to_vec()]);
    }

    #[test]
    fn s1_frame_recovery() {
        let mut stream = vec![0xAAu8; 5];
        stream.extend(telegram(b"abc"));
        stream.extend(telegram(b"ok"));

        let mut framer = Framer::new();
        let out = framer.feed(&stream);
        assert_eq!(out, vec![b"abc".to_vec(), b"ok".to_vec()]);
    }

    #[test]
    fn bad_checksum_is_dropped_but_resyncs() {
        let mut good = telegram(b"abc");
        let bad = telegram(b"xyz");
        let mut bad_corrupted = bad.clone();
        let last = bad_corrupted.len() - 1;
        bad_corrupted[last] ^= 0xFF;

        let mut stream = bad_corrupted;
        stream.extend_from_slice(&good);
        good.clear();

        let mut framer = Framer::new();
        let out = framer.feed(&stream);
        assert_eq!(out, vec![b"abc".to_vec()]);
    }

    #[test]
    fn coalesced_packets_both_emitted() {
        let mut stream = telegram(b"one");
        stream.extend(telegram(b"two"));
        let mut framer = Framer::new();
        let out = framer.feed(&stream);
        assert_eq!(out, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn stx_split_across_feeds_is_not_lost() {
        let bytes = telegram(b"recovered");
        // Split inside the STX marker itself: feed 3 of its 4 bytes first.
        let (a, b) = bytes.split_at(3);
        let mut framer = Framer::new();
        assert!(framer.feed(a).is_empty());
        let out = framer.feed(b);
        assert_eq!(out, vec![b"recovered".to_vec()]);
    }

    #[test]
    fn garbage_before_split_stx_keeps_partial_marker() {
        // Feed junk bytes that themselves end in a 2-byte STX prefix with no
        // complete 4-byte match yet; a prior bug cleared the whole buffer
        // here, losing those 2 genuine STX bytes.
        let mut framer = Framer::new();
        assert!(framer.feed(&[0xAA, 0xBB, 0x02, 0x02]).is_empty());

        let mut rest = vec![0x02, 0x02]; // completes the STX marker
        rest.extend(&telegram(b"after-junk")[4..]); // LEN + PAYLOAD + CHK
        let out = framer.feed(&rest);
        assert_eq!(out, vec![b"after-junk".to_vec()]);
    }

    #[test]
    fn incomplete_telegram_waits_for_more() {
        let bytes = telegram(b"wait-for-it");
        let (a, b) = bytes.split_at(bytes.len() - 1);
        let mut framer = Framer::new();
        assert!(framer.feed(a).is_empty());
        let out = framer.feed(b);
        assert_eq!(out, vec![b"wait-for-it".to_vec()]);
    }
}
