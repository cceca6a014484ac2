//! Human-readable text produced by the executor.

use verilist_types::{RichText, VerifierProfile};

/// `@subject has been verified by <verifier>.`
pub fn announcement(subject_handle: &str, subject_id: &str, verifier_label: &str) -> RichText {
    RichText::new()
        .mention(subject_handle, subject_id)
        .text(format!(" has been verified by {verifier_label}."))
}

/// How a verifier is named in announcements, from static config alone.
pub fn configured_label(profile: &VerifierProfile) -> Option<String> {
    profile
        .name
        .clone()
        .or_else(|| profile.handle.as_ref().map(|h| format!("@{}", h.trim_start_matches('@'))))
}

/// Operator notice for a verifier with no configured lists.
pub fn configuration_gap(verifier_id: &str, verifier_handle: Option<&str>, subject_id: &str) -> String {
    let who = match verifier_handle {
        Some(handle) => format!("@{handle} ({verifier_id})"),
        None => verifier_id.to_string(),
    };
    format!(
        "New verifier without a configured list: {who} verified {subject_id}. \
         The account was added to the catch-all list only."
    )
}
