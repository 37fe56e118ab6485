/// Account records and balance bookkeeping.
/// Balances only change by applying events, which are created by handling commands.
pub mod account;

/// Operation requests and their validation into commands executed by [`engine`].
pub mod command;

/// Balance mutation engine: deposits, withdrawals and transfers with
/// per-account serialization on top of an [`store::AccountStore`].
pub mod engine;

/// Account store contract plus two in memory implementations,
/// a pessimistic one (per record locks) and an optimistic one (versioned records).
pub mod store;

/// CSV batch driver, stands in for the request layer that normally calls
/// the engine. It lives here so integration tests can use it.
pub mod bin_utils;
