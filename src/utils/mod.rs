//! Shared plumbing for `ccpubsub`: the error taxonomy, tracing setup and
//! auth token inspection.

pub mod error;
pub mod logging;
pub mod token;

#[cfg(test)]
mod tests {
    use super::logging::{init, parse_level};
    use tracing::Level;

    #[test]
    fn repeated_init_is_harmless() {
        for level in ["trace", "error", "bogus"] {
            init(level);
        }
    }

    #[test]
    fn parse_level_falls_back_to_info() {
        assert_eq!(parse_level("WARNING"), Level::WARN);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
        assert_eq!(parse_level("loud"), Level::INFO);
    }
}
