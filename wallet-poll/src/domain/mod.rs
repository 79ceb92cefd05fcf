pub mod allowance;
pub mod balances;
pub mod fees;
pub mod metadata;
