pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    error, header, human_bytes, info, muted, op_pending, op_present, section, status, success,
    summary_row, warn,
};
pub use table::{backups_table, columns_table, incidents_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
