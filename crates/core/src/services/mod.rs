pub mod account_mark_store;
pub mod fund_flow_processor;
pub mod ledger_journal;
pub mod unit_ledger;
pub mod valuation_engine;
