use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS staff (
    user_id BLOB PRIMARY KEY CHECK (length(user_id) = 16),
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    last_seen_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS variants (
    variant_id BLOB PRIMARY KEY CHECK (length(variant_id) = 16),
    sku TEXT NOT NULL UNIQUE,
    stock INTEGER NOT NULL CHECK (stock >= 0)
);

CREATE TABLE IF NOT EXISTS job_sequences (
    day TEXT PRIMARY KEY,
    last_seq INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    order_id BLOB PRIMARY KEY CHECK (length(order_id) = 16),
    job_code TEXT NOT NULL UNIQUE,
    customer_name TEXT NOT NULL,
    customer_phone TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL CHECK (status IN (
        'PENDING_ARTWORK', 'DESIGNING', 'PENDING_STOCK_CHECK', 'STOCK_ISSUE',
        'STOCK_RECHECKED', 'IN_PRODUCTION', 'PRODUCTION_FINISHED', 'QC_PASSED',
        'READY_TO_SHIP', 'COMPLETED', 'CANCELLED'
    )),
    sales_id BLOB NOT NULL CHECK (length(sales_id) = 16),
    graphic_id BLOB CHECK (graphic_id IS NULL OR length(graphic_id) = 16),
    stock_id BLOB CHECK (stock_id IS NULL OR length(stock_id) = 16),
    production_id BLOB CHECK (production_id IS NULL OR length(production_id) = 16),
    qc_id BLOB CHECK (qc_id IS NULL OR length(qc_id) = 16),
    total_price TEXT NOT NULL,
    paid_amount TEXT NOT NULL,
    legacy_deposit TEXT NOT NULL,
    payment_method TEXT NOT NULL CHECK (payment_method IN ('TRANSFER', 'COD')),
    backorder_status TEXT NOT NULL CHECK (backorder_status IN (
        'NONE', 'WAITING_INPUT', 'WAITING_ARRIVAL', 'DELAYED_ROUND_1',
        'WAITING_ARRIVAL_REVISED', 'DELAYED_ROUND_2', 'ARRIVED'
    )),
    backorder_eta TEXT,
    eta_revisions INTEGER NOT NULL DEFAULT 0,
    backorder_reason TEXT,
    is_urgent INTEGER NOT NULL DEFAULT 0,
    urgent_note TEXT,
    tracking_no TEXT,
    artwork_ref TEXT,
    production_file_ref TEXT,
    specs BLOB NOT NULL,
    due_date TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    production_started_at INTEGER,
    production_completed_at INTEGER,
    rejection_count INTEGER NOT NULL DEFAULT 0 CHECK (rejection_count >= 0),
    damaged_count INTEGER NOT NULL DEFAULT 0 CHECK (damaged_count >= 0)
);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status, updated_at);
CREATE INDEX IF NOT EXISTS idx_orders_sales ON orders (sales_id);
CREATE INDEX IF NOT EXISTS idx_orders_backorder ON orders (backorder_status, backorder_eta);

CREATE TABLE IF NOT EXISTS order_items (
    order_id BLOB NOT NULL REFERENCES orders (order_id),
    line_no INTEGER NOT NULL,
    variant_id BLOB NOT NULL REFERENCES variants (variant_id),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    unit_price TEXT NOT NULL,
    specs BLOB NOT NULL,
    PRIMARY KEY (order_id, line_no)
);

CREATE TABLE IF NOT EXISTS purchase_requests (
    request_id BLOB PRIMARY KEY CHECK (length(request_id) = 16),
    order_id BLOB NOT NULL REFERENCES orders (order_id),
    variant_id BLOB NOT NULL REFERENCES variants (variant_id),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'COMPLETED')),
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_requests_variant ON purchase_requests (variant_id, created_at)
    WHERE status = 'PENDING';
CREATE INDEX IF NOT EXISTS idx_requests_order ON purchase_requests (order_id);

CREATE TABLE IF NOT EXISTS payment_entries (
    payment_id BLOB PRIMARY KEY CHECK (length(payment_id) = 16),
    order_id BLOB NOT NULL REFERENCES orders (order_id),
    amount TEXT NOT NULL,
    method TEXT NOT NULL CHECK (method IN ('TRANSFER', 'COD')),
    evidence_ref TEXT,
    note TEXT,
    uploaded_by BLOB NOT NULL CHECK (length(uploaded_by) = 16),
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payments_order ON payment_entries (order_id, created_at);

CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY,
    order_id BLOB CHECK (order_id IS NULL OR length(order_id) = 16),
    actor_id BLOB CHECK (actor_id IS NULL OR length(actor_id) = 16),
    action TEXT NOT NULL,
    detail TEXT NOT NULL,
    at INTEGER NOT NULL,
    prev_hash BLOB NOT NULL CHECK (length(prev_hash) = 32),
    entry_hash BLOB NOT NULL CHECK (length(entry_hash) = 32)
);
CREATE INDEX IF NOT EXISTS idx_audit_order ON audit_log (order_id, seq);
";
