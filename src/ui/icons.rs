pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const NEW: &str = "✨";
    pub const CLOCK: &str = "⏱️";
    pub const HASH: &str = "#️⃣";
    pub const SIREN: &str = "🚨";
}
