//! Property checks for the command validator

use ops_validator::{CommandRisk, CommandValidator};
use proptest::prelude::*;

proptest! {
    // Validation is deterministic and idempotent for arbitrary input
    #[test]
    fn validate_is_deterministic(command in "\\PC{0,80}") {
        let validator = CommandValidator::new().unwrap();
        let first = validator.validate(&command);
        let second = validator.validate(&command);
        prop_assert_eq!(first, second);
    }

    // Two independently built validators agree on every input
    #[test]
    fn catalog_is_stable_across_instances(command in "\\PC{0,80}") {
        let a = CommandValidator::new().unwrap();
        let b = CommandValidator::new().unwrap();
        prop_assert_eq!(a.validate(&command), b.validate(&command));
    }

    // Nothing matching the forbidden layer ever comes back allowed
    #[test]
    fn forbidden_never_allowed(suffix in "[a-z /\\-]{0,40}") {
        let validator = CommandValidator::new().unwrap();
        let command = format!("rm -rf /{}", suffix);
        let verdict = validator.validate(&command);
        prop_assert!(!verdict.allowed);
        prop_assert_eq!(verdict.risk, CommandRisk::Forbidden);
    }
}
