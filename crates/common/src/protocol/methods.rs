// Transport method names used by the mirror.

// ── Metadata ───────────────────────────────────────────────────────
pub const GET_DOCTYPE: &str = "desk.form.load.getdoctype";

// ── Documents ──────────────────────────────────────────────────────
pub const GET_DOC: &str = "desk.form.load.getdoc";

// ── Session ────────────────────────────────────────────────────────
pub const GET_USER_PERMISSIONS: &str = "desk.user_permissions.get";

pub const ALL_METHODS: &[&str] = &[GET_DOCTYPE, GET_DOC, GET_USER_PERMISSIONS];
