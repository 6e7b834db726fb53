pub mod account;
pub mod account_mark;
pub mod book;
pub mod fund_flow;
pub mod ledger;
pub mod mark;
pub mod settings;
pub mod unit_ledger;
