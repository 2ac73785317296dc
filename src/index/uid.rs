use uuid::Uuid;

pub const UID_LENGTH: usize = 11;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub trait UidGenerator {
    fn generate(&mut self) -> String;
}

/// DHIS2-style identifiers: one letter followed by ten alphanumerics.
#[derive(Debug, Default)]
pub struct Dhis2UidGenerator {
    pool: RandomBytes,
}

impl UidGenerator for Dhis2UidGenerator {
    fn generate(&mut self) -> String {
        let mut uid = String::with_capacity(UID_LENGTH);
        uid.push(self.pool.pick(LETTERS));
        while uid.len() < UID_LENGTH {
            uid.push(self.pool.pick(ALPHANUMERIC));
        }
        uid
    }
}

/// Random bytes drawn from v4 UUIDs, skipping the version and variant bytes.
#[derive(Debug, Default)]
struct RandomBytes {
    buf: [u8; 16],
    pos: usize,
}

impl RandomBytes {
    fn next_byte(&mut self) -> u8 {
        loop {
            if self.pos == 0 || self.pos >= self.buf.len() {
                self.buf = Uuid::new_v4().into_bytes();
                self.pos = 0;
            }
            let idx = self.pos;
            self.pos += 1;
            if idx != 6 && idx != 8 {
                return self.buf[idx];
            }
        }
    }

    // Rejection sampling keeps the pick uniform over the alphabet.
    fn pick(&mut self, alphabet: &[u8]) -> char {
        let limit = 256 - (256 % alphabet.len());
        loop {
            let b = self.next_byte() as usize;
            if b < limit {
                return alphabet[b % alphabet.len()] as char;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_valid_uid(candidate: &str) -> bool {
        let bytes = candidate.as_bytes();
        bytes.len() == UID_LENGTH
            && bytes[0].is_ascii_alphabetic()
            && bytes.iter().all(u8::is_ascii_alphanumeric)
    }

    #[test]
    fn generates_valid_uids() {
        let mut generator = Dhis2UidGenerator::default();
        for _ in 0..500 {
            let uid = generator.generate();
            assert!(is_valid_uid(&uid), "invalid uid {uid}");
        }
    }

    #[test]
    fn generated_uids_are_distinct() {
        let mut generator = Dhis2UidGenerator::default();
        let uids: HashSet<_> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(uids.len(), 1000);
    }

    #[test]
    fn validates_shape() {
        assert!(is_valid_uid("Nep6qUpNTNn"));
        assert!(!is_valid_uid("1ep6qUpNTNn"));
        assert!(!is_valid_uid("Nep6qUpNTN"));
        assert!(!is_valid_uid("Nep6qUp-TNn"));
    }
}
