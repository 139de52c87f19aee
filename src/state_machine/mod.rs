mod budget;
mod ledger;
mod run_state;
mod state;

pub use budget::{Admission, BudgetExceeded, RetryBudget};
pub use ledger::{CorrectionRecord, LEDGER_FILE, Ledger, LedgerEntry};
pub use run_state::RunState;
pub use state::{Outcome, Phase};
