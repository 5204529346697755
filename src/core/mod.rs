pub mod error;
pub mod quota;
pub mod types;

pub use error::{LedgerError, Result};
pub use quota::QuotaDisplay;
pub use types::{
    BalanceDelta, BalanceField, ChannelId, MAX_PAGE_SIZE, OrderId, Page, PlanId, SECONDS_PER_DAY,
    TaskRowId, UserBalance, UserId, page_offset, unix_now,
};
