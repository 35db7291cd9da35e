//! External id generation: `<type><timestamp><random>[_<ownerTail>]` (§3).

use chrono::Utc;
use rand::Rng;

use crate::job::JobType;

/// Generate a new external id for a job of the given type, optionally
/// appending an owner-derived tail for readability/debuggability.
pub fn generate_external_id(job_type: JobType, owner_id: Option<&str>) -> String {
    let millis = Utc::now().timestamp_millis();
    let random: u32 = rand::thread_rng().gen_range(0..0xFFFFFF);

    let mut id = format!("{}{}{:06x}", job_type.as_str(), millis, random);

    if let Some(owner) = owner_id {
        let tail: String = owner.chars().rev().take(6).collect::<String>().chars().rev().collect();
        if !tail.is_empty() {
            id.push('_');
            id.push_str(&tail);
        }
    }

    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_is_prefixed_by_type() {
        let id = generate_external_id(JobType::Parsing, None);
        assert!(id.starts_with("parsing"));
    }

    #[test]
    fn test_generated_id_includes_owner_tail() {
        let id = generate_external_id(JobType::WebhookDelivery, Some("user-123456"));
        assert!(id.ends_with("123456"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_external_id(JobType::Evaluation, None);
        let b = generate_external_id(JobType::Evaluation, None);
        assert_ne!(a, b);
    }
}
