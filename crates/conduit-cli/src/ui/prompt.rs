//! Interactive confirmation.

use std::io::{self, BufRead, Write};

use conduit_core::Confirm;
use conduit_core::transaction::TransactionPlan;

use super::table::{plan_table, plan_totals};

const QUESTION: &str = "Confirm changes: [Y/n] ";

/// Asks on stdin; an empty answer means yes.
#[derive(Debug, Clone, Default)]
pub struct PromptConfirm {
    /// Set when no reporter printed the plan, so the prompt shows it itself.
    show_plan: Option<String>,
}

impl PromptConfirm {
    /// Prompt after the reporter has already shown the plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompt that prints the plan table first, for quiet runs.
    pub fn with_plan(channel_alias: impl Into<String>) -> Self {
        Self {
            show_plan: Some(channel_alias.into()),
        }
    }

    /// Everything printed before reading the answer.
    pub fn prompt_text(&self, plan: &TransactionPlan) -> String {
        match &self.show_plan {
            Some(alias) => format!(
                "{}\n  {}\n\n{QUESTION}",
                plan_table(plan, alias),
                plan_totals(plan)
            ),
            None => format!("\n{QUESTION}"),
        }
    }
}

/// Interpret a `[Y/n]` answer.
pub fn accepts(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    answer.is_empty() || answer == "y" || answer == "yes"
}

impl Confirm for PromptConfirm {
    fn confirm(&self, plan: &TransactionPlan) -> bool {
        print!("{}", self.prompt_text(plan));
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            // EOF is not consent
            Ok(0) | Err(_) => false,
            Ok(_) => accepts(&input),
        }
    }
}
