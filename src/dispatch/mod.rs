//! Turn dispatch: pacing, the per-turn controller, and the per-chat
//! router.

pub mod pacing;
pub mod router;
pub mod turn;

pub use pacing::FragmentPacer;
pub use router::ChatRouter;
pub use turn::{ClarificationRequest, DroppedIntent, TurnDispatcher, TurnResult};

/// Generic fallback when a turn cannot be processed at all (oracle timeout,
/// malformed envelope, internal error). Never carries internal detail.
pub const FALLBACK_REPLY: &str =
    "Xin lỗi, mình chưa xử lý được tin nhắn này. Bạn thử nhắn lại giúp mình nhé.";

/// Generic failure when a ledger batch is rejected.
pub const REJECTED_REPLY: &str =
    "Có gì đó không ổn với khoản này nên mình chưa ghi. Bạn kiểm tra lại giúp mình nhé.";

/// Core-side wording when the oracle cannot supply the clarifying question.
pub(crate) fn clarify_question(reference: &str, names: &[String]) -> String {
    format!("\"{}\" là ai vậy: {}?", reference, names.join(" hay "))
}

/// Note appended when a never-seen name is materialized as a new member.
pub(crate) fn virtual_member_note(display_name: &str) -> String {
    format!(
        "Mình chưa gặp \"{display_name}\" bao giờ nên đã thêm vào sổ. Nếu nhầm người thì nói mình nhé."
    )
}

/// Acknowledgement after a suspended mutation resumes.
pub(crate) fn resume_ack(display_name: &str) -> String {
    format!("Ok, ghi cho {display_name} nhé.")
}

/// Sent when one mutation had to be dropped while the rest of the turn
/// proceeded.
pub(crate) fn dropped_note(reference: &str) -> String {
    if reference.trim().is_empty() {
        "Có một khoản mình không biết ghi cho ai nên bỏ qua nhé.".to_string()
    } else {
        format!("Khoản cho \"{reference}\" mình chưa ghi được, bạn nhắn lại rõ hơn giúp mình nhé.")
    }
}
