use rand::Rng;
#[cfg(test)] use std::sync::Mutex;

#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

#[cfg_attr(test, mockall::automock)]
pub trait Random: Send + Sync {
    /// A fresh initial sequence number in `0..=i32::MAX`. Staying below 2^31 leaves room for
    ///  2^31 data packets before the sequence number wraps around.
    fn initial_sequence_number() -> u32;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn initial_sequence_number() -> u32 {
        rand::rng().random_range(0..=i32::MAX as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_sequence_number_range() {
        for _ in 0..1000 {
            assert!(RngRandom::initial_sequence_number() <= i32::MAX as u32);
        }
    }
}
