use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

use stitchline_core::{
    clock::from_millis,
    ids::*,
    spec_value::{self, SpecPayload},
    AuditAction, AuditEntry, Assignees, BackorderState, BackorderStatus, Customer, Department,
    Financials, LineItem, Order, OrderStatus, PaymentEntry, PaymentMethod, PurchaseRequest,
    QcTally, RequestStatus, Role, StaffDirectory, StaffMember, Variant,
};

use crate::error::StorageError;
use crate::traits::{OrderQuery, Storage};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn opt_array(v: Option<Vec<u8>>, label: &str) -> Result<Option<[u8; 16]>, StorageError> {
    v.map(|b| to_array::<16>(b, label)).transpose()
}

fn decimal(s: &str, label: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Serialization(format!("{label}: {e}")))
}

fn date(s: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| StorageError::Serialization(format!("date {s}: {e}")))
}

fn date_text(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn instant(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    Ok(from_millis(ms)?)
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const GENESIS_HASH: [u8; 32] = [0; 32];

fn slot_column(department: Department) -> &'static str {
    match department {
        Department::Graphic => "graphic_id",
        Department::Stock => "stock_id",
        Department::Production => "production_id",
        Department::Qc => "qc_id",
    }
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Opens a write transaction. `BEGIN IMMEDIATE` takes the write lock up
    /// front so concurrent writers queue on `busy_timeout` instead of
    /// failing at their first write.
    pub fn begin(&mut self) -> Result<StoreTx<'_>, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StoreTx { tx })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.conn.path())
            .finish()
    }
}

/// One open write transaction. Dropping it without [`StoreTx::commit`] rolls back.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

const ORDER_COLUMNS: &str = "order_id, job_code, customer_name, customer_phone, notes, status, \
    sales_id, graphic_id, stock_id, production_id, qc_id, \
    total_price, paid_amount, legacy_deposit, payment_method, \
    backorder_status, backorder_eta, eta_revisions, backorder_reason, \
    is_urgent, urgent_note, tracking_no, artwork_ref, production_file_ref, specs, due_date, \
    created_at, updated_at, production_started_at, production_completed_at, \
    rejection_count, damaged_count";

/// Column values as SQLite hands them back; converted outside the row closure.
struct RawOrder {
    order_id: Vec<u8>,
    job_code: String,
    customer_name: String,
    customer_phone: String,
    notes: String,
    status: String,
    sales_id: Vec<u8>,
    slots: [Option<Vec<u8>>; 4],
    total_price: String,
    paid_amount: String,
    legacy_deposit: String,
    payment_method: String,
    backorder_status: String,
    backorder_eta: Option<String>,
    eta_revisions: i64,
    backorder_reason: Option<String>,
    is_urgent: bool,
    urgent_note: Option<String>,
    tracking_no: Option<String>,
    artwork_ref: Option<String>,
    production_file_ref: Option<String>,
    specs: Vec<u8>,
    due_date: Option<String>,
    created_at: i64,
    updated_at: i64,
    production_started_at: Option<i64>,
    production_completed_at: Option<i64>,
    rejection_count: i64,
    damaged_count: i64,
}

fn read_raw_order(row: &rusqlite::Row) -> rusqlite::Result<RawOrder> {
    Ok(RawOrder {
        order_id: row.get(0)?,
        job_code: row.get(1)?,
        customer_name: row.get(2)?,
        customer_phone: row.get(3)?,
        notes: row.get(4)?,
        status: row.get(5)?,
        sales_id: row.get(6)?,
        slots: [row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?],
        total_price: row.get(11)?,
        paid_amount: row.get(12)?,
        legacy_deposit: row.get(13)?,
        payment_method: row.get(14)?,
        backorder_status: row.get(15)?,
        backorder_eta: row.get(16)?,
        eta_revisions: row.get(17)?,
        backorder_reason: row.get(18)?,
        is_urgent: row.get(19)?,
        urgent_note: row.get(20)?,
        tracking_no: row.get(21)?,
        artwork_ref: row.get(22)?,
        production_file_ref: row.get(23)?,
        specs: row.get(24)?,
        due_date: row.get(25)?,
        created_at: row.get(26)?,
        updated_at: row.get(27)?,
        production_started_at: row.get(28)?,
        production_completed_at: row.get(29)?,
        rejection_count: row.get(30)?,
        damaged_count: row.get(31)?,
    })
}

impl RawOrder {
    fn into_order(self) -> Result<Order, StorageError> {
        let [graphic, stock, production, qc] = self.slots;
        let user = |v, label| opt_array(v, label).map(|b| b.map(UserId::from_bytes));
        Ok(Order {
            id: OrderId::from_bytes(to_array::<16>(self.order_id, "order_id")?),
            job_code: JobCode::from_raw(self.job_code),
            customer: Customer {
                name: self.customer_name,
                phone: self.customer_phone,
            },
            notes: self.notes,
            status: OrderStatus::parse(&self.status)?,
            sales_id: UserId::from_bytes(to_array::<16>(self.sales_id, "sales_id")?),
            assignees: Assignees {
                graphic: user(graphic, "graphic_id")?,
                stock: user(stock, "stock_id")?,
                production: user(production, "production_id")?,
                qc: user(qc, "qc_id")?,
            },
            financials: Financials {
                total_price: decimal(&self.total_price, "total_price")?,
                paid_amount: decimal(&self.paid_amount, "paid_amount")?,
                legacy_deposit: decimal(&self.legacy_deposit, "legacy_deposit")?,
                payment_method: PaymentMethod::parse(&self.payment_method)?,
            },
            backorder: BackorderState {
                status: BackorderStatus::parse(&self.backorder_status)?,
                eta: self.backorder_eta.as_deref().map(date).transpose()?,
                eta_revisions: u32::try_from(self.eta_revisions).map_err(|_| {
                    StorageError::Serialization("negative eta_revisions".into())
                })?,
                reason: self.backorder_reason,
            },
            is_urgent: self.is_urgent,
            urgent_note: self.urgent_note,
            tracking_no: self.tracking_no,
            artwork_ref: self.artwork_ref,
            production_file_ref: self.production_file_ref,
            specs: spec_value::from_msgpack(&self.specs)?,
            due_date: self.due_date.as_deref().map(date).transpose()?,
            created_at: instant(self.created_at)?,
            updated_at: instant(self.updated_at)?,
            production_started_at: self.production_started_at.map(instant).transpose()?,
            production_completed_at: self.production_completed_at.map(instant).transpose()?,
            qc: QcTally {
                rejections: quantity_u32(self.rejection_count)?,
                damaged: quantity_u32(self.damaged_count)?,
            },
        })
    }
}

type RawRequest = (Vec<u8>, Vec<u8>, Vec<u8>, i64, String, i64);

fn read_raw_request(row: &rusqlite::Row) -> rusqlite::Result<RawRequest> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_request(raw: RawRequest) -> Result<PurchaseRequest, StorageError> {
    let (id, order_id, variant_id, quantity, status, created_at) = raw;
    Ok(PurchaseRequest {
        id: PurchaseRequestId::from_bytes(to_array::<16>(id, "request_id")?),
        order_id: OrderId::from_bytes(to_array::<16>(order_id, "order_id")?),
        variant_id: VariantId::from_bytes(to_array::<16>(variant_id, "variant_id")?),
        quantity: quantity_u32(quantity)?,
        status: RequestStatus::parse(&status)?,
        created_at: instant(created_at)?,
    })
}

fn quantity_u32(q: i64) -> Result<u32, StorageError> {
    u32::try_from(q).map_err(|_| StorageError::Serialization(format!("invalid quantity {q}")))
}

type RawAudit = (i64, Option<Vec<u8>>, Option<Vec<u8>>, String, String, i64);

fn read_raw_audit(row: &rusqlite::Row) -> rusqlite::Result<RawAudit> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_audit(raw: RawAudit) -> Result<AuditEntry, StorageError> {
    let (seq, order_id, actor, action, detail, at) = raw;
    Ok(AuditEntry {
        seq,
        order_id: opt_array(order_id, "order_id")?.map(OrderId::from_bytes),
        actor: opt_array(actor, "actor_id")?.map(UserId::from_bytes),
        action: AuditAction::parse(&action)?,
        detail,
        at: instant(at)?,
    })
}

fn audit_hash(prev: &[u8; 32], entry: &AuditEntry) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev);
    hasher.update(&entry.seq.to_le_bytes());
    hasher.update(entry.order_id.as_ref().map_or(&[0u8; 16], |id| id.as_bytes()));
    hasher.update(entry.actor.as_ref().map_or(&[0u8; 16], |id| id.as_bytes()));
    hasher.update(entry.action.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(entry.detail.as_bytes());
    hasher.update(&[0]);
    hasher.update(&entry.at.timestamp_millis().to_le_bytes());
    *hasher.finalize().as_bytes()
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

mod reads {
    use super::*;

    pub fn get_order(conn: &Connection, order_id: OrderId) -> Result<Option<Order>, StorageError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?1");
        let raw = conn
            .query_row(&sql, params![order_id.as_bytes().as_slice()], read_raw_order)
            .optional()?;
        raw.map(RawOrder::into_order).transpose()
    }

    pub fn find_order_by_job_code(
        conn: &Connection,
        job_code: &str,
    ) -> Result<Option<Order>, StorageError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE job_code = ?1 COLLATE NOCASE");
        let raw = conn
            .query_row(&sql, params![job_code.trim()], read_raw_order)
            .optional()?;
        raw.map(RawOrder::into_order).transpose()
    }

    pub fn list_orders(conn: &Connection, query: &OrderQuery) -> Result<Vec<Order>, StorageError> {
        let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = query.status {
            args.push(Box::new(status.as_str()));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        } else if !query.include_terminal {
            sql.push_str(" AND status NOT IN ('COMPLETED', 'CANCELLED')");
        }
        if let Some(sales_id) = query.sales_id {
            args.push(Box::new(sales_id.as_bytes().to_vec()));
            sql.push_str(&format!(" AND sales_id = ?{}", args.len()));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            args.push(Box::new(format!("%{}%", search.to_lowercase())));
            let n = args.len();
            sql.push_str(&format!(
                " AND (lower(job_code) LIKE ?{n} OR lower(customer_name) LIKE ?{n})"
            ));
        }
        sql.push_str(" ORDER BY is_urgent DESC, created_at DESC, order_id DESC");

        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), read_raw_order)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawOrder::into_order).collect()
    }

    pub fn get_items(conn: &Connection, order_id: OrderId) -> Result<Vec<LineItem>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT line_no, variant_id, quantity, unit_price, specs FROM order_items
             WHERE order_id = ?1 ORDER BY line_no",
        )?;
        let rows = stmt
            .query_map(params![order_id.as_bytes().as_slice()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(rows.len());
        for (line_no, variant_id, quantity, unit_price, specs) in rows {
            items.push(LineItem {
                line_no: quantity_u32(line_no)?,
                variant_id: VariantId::from_bytes(to_array::<16>(variant_id, "variant_id")?),
                quantity: quantity_u32(quantity)?,
                unit_price: decimal(&unit_price, "unit_price")?,
                specs: spec_value::from_msgpack(&specs)?,
            });
        }
        Ok(items)
    }

    pub fn get_variant(
        conn: &Connection,
        variant_id: VariantId,
    ) -> Result<Option<Variant>, StorageError> {
        let row = conn
            .query_row(
                "SELECT sku, stock FROM variants WHERE variant_id = ?1",
                params![variant_id.as_bytes().as_slice()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(sku, stock)| Variant {
            id: variant_id,
            sku,
            stock,
        }))
    }

    const REQUEST_COLUMNS: &str =
        "request_id, order_id, variant_id, quantity, status, created_at";

    pub fn pending_requests_for_variant(
        conn: &Connection,
        variant_id: VariantId,
    ) -> Result<Vec<PurchaseRequest>, StorageError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM purchase_requests
             WHERE variant_id = ?1 AND status = 'PENDING'
             ORDER BY created_at, request_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![variant_id.as_bytes().as_slice()], read_raw_request)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(decode_request).collect()
    }

    pub fn requests_for_order(
        conn: &Connection,
        order_id: OrderId,
    ) -> Result<Vec<PurchaseRequest>, StorageError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM purchase_requests
             WHERE order_id = ?1 ORDER BY created_at, request_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![order_id.as_bytes().as_slice()], read_raw_request)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(decode_request).collect()
    }

    pub fn payments_for_order(
        conn: &Connection,
        order_id: OrderId,
    ) -> Result<Vec<PaymentEntry>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT payment_id, amount, method, evidence_ref, note, uploaded_by, created_at
             FROM payment_entries WHERE order_id = ?1
             ORDER BY created_at DESC, payment_id DESC",
        )?;
        let rows = stmt
            .query_map(params![order_id.as_bytes().as_slice()], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, amount, method, evidence_ref, note, uploaded_by, created_at) in rows {
            entries.push(PaymentEntry {
                id: PaymentId::from_bytes(to_array::<16>(id, "payment_id")?),
                order_id,
                amount: decimal(&amount, "amount")?,
                method: PaymentMethod::parse(&method)?,
                evidence_ref,
                note,
                uploaded_by: UserId::from_bytes(to_array::<16>(uploaded_by, "uploaded_by")?),
                created_at: instant(created_at)?,
            });
        }
        Ok(entries)
    }

    pub fn audit_for_order(
        conn: &Connection,
        order_id: OrderId,
    ) -> Result<Vec<AuditEntry>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT seq, order_id, actor_id, action, detail, at FROM audit_log
             WHERE order_id = ?1 ORDER BY seq",
        )?;
        let raws = stmt
            .query_map(params![order_id.as_bytes().as_slice()], read_raw_audit)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(decode_audit).collect()
    }

    pub fn audit_log(conn: &Connection) -> Result<Vec<AuditEntry>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT seq, order_id, actor_id, action, detail, at FROM audit_log ORDER BY seq",
        )?;
        let raws = stmt
            .query_map([], read_raw_audit)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(decode_audit).collect()
    }

    pub fn staff_directory(conn: &Connection) -> Result<StaffDirectory, StorageError> {
        let mut stmt = conn.prepare("SELECT user_id, name, role FROM staff")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut directory = StaffDirectory::with_capacity(rows.len());
        for (id, name, role) in rows {
            let id = UserId::from_bytes(to_array::<16>(id, "user_id")?);
            directory.insert(
                id,
                StaffMember {
                    id,
                    name,
                    role: Role::parse(&role)?,
                },
            );
        }
        Ok(directory)
    }

    fn order_ids(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<OrderId>, StorageError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|b| Ok(OrderId::from_bytes(to_array::<16>(b, "order_id")?)))
            .collect()
    }

    pub fn stale_orders(
        conn: &Connection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<OrderId>, StorageError> {
        order_ids(
            conn,
            "SELECT order_id FROM orders
             WHERE status NOT IN ('COMPLETED', 'CANCELLED') AND is_urgent = 0 AND updated_at < ?1
             ORDER BY updated_at",
            params![cutoff.timestamp_millis()],
        )
    }

    pub fn overdue_backorders(
        conn: &Connection,
        today: NaiveDate,
    ) -> Result<Vec<OrderId>, StorageError> {
        order_ids(
            conn,
            "SELECT order_id FROM orders
             WHERE backorder_status IN ('WAITING_ARRIVAL', 'WAITING_ARRIVAL_REVISED')
               AND backorder_eta IS NOT NULL AND backorder_eta < ?1
             ORDER BY backorder_eta",
            params![date_text(today)],
        )
    }

    pub fn verify_audit_chain(conn: &Connection) -> Result<usize, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT seq, order_id, actor_id, action, detail, at, prev_hash, entry_hash
             FROM audit_log ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    read_raw_audit(row)?,
                    row.get::<_, Vec<u8>>(6)?,
                    row.get::<_, Vec<u8>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut prev = GENESIS_HASH;
        let count = rows.len();
        for (raw, stored_prev, stored_hash) in rows {
            let entry = decode_audit(raw)?;
            let stored_prev = to_array::<32>(stored_prev, "prev_hash")?;
            let stored_hash = to_array::<32>(stored_hash, "entry_hash")?;
            if stored_prev != prev || audit_hash(&prev, &entry) != stored_hash {
                return Err(StorageError::AuditChainBroken { seq: entry.seq });
            }
            prev = stored_hash;
        }
        Ok(count)
    }
}

macro_rules! impl_storage_reads {
    ($ty:ty) => {
        impl Storage for $ty {
            fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StorageError> {
                reads::get_order(self.conn(), order_id)
            }

            fn find_order_by_job_code(&self, job_code: &str) -> Result<Option<Order>, StorageError> {
                reads::find_order_by_job_code(self.conn(), job_code)
            }

            fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, StorageError> {
                reads::list_orders(self.conn(), query)
            }

            fn get_items(&self, order_id: OrderId) -> Result<Vec<LineItem>, StorageError> {
                reads::get_items(self.conn(), order_id)
            }

            fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StorageError> {
                reads::get_variant(self.conn(), variant_id)
            }

            fn pending_requests_for_variant(
                &self,
                variant_id: VariantId,
            ) -> Result<Vec<PurchaseRequest>, StorageError> {
                reads::pending_requests_for_variant(self.conn(), variant_id)
            }

            fn requests_for_order(
                &self,
                order_id: OrderId,
            ) -> Result<Vec<PurchaseRequest>, StorageError> {
                reads::requests_for_order(self.conn(), order_id)
            }

            fn payments_for_order(
                &self,
                order_id: OrderId,
            ) -> Result<Vec<PaymentEntry>, StorageError> {
                reads::payments_for_order(self.conn(), order_id)
            }

            fn audit_for_order(&self, order_id: OrderId) -> Result<Vec<AuditEntry>, StorageError> {
                reads::audit_for_order(self.conn(), order_id)
            }

            fn audit_log(&self) -> Result<Vec<AuditEntry>, StorageError> {
                reads::audit_log(self.conn())
            }

            fn staff_directory(&self) -> Result<StaffDirectory, StorageError> {
                reads::staff_directory(self.conn())
            }

            fn stale_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderId>, StorageError> {
                reads::stale_orders(self.conn(), cutoff)
            }

            fn overdue_backorders(&self, today: NaiveDate) -> Result<Vec<OrderId>, StorageError> {
                reads::overdue_backorders(self.conn(), today)
            }

            fn verify_audit_chain(&self) -> Result<usize, StorageError> {
                reads::verify_audit_chain(self.conn())
            }
        }
    };
}

impl_storage_reads!(SqliteStorage);
impl_storage_reads!(StoreTx<'_>);

// ---------------------------------------------------------------------------
// Guarded writes
// ---------------------------------------------------------------------------

impl StoreTx<'_> {
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn upsert_staff(&self, member: &StaffMember, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT INTO staff (user_id, name, role, last_seen_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET name = ?2, role = ?3, last_seen_at = ?4",
            params![
                member.id.as_bytes().as_slice(),
                member.name,
                member.role.as_str(),
                at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_variant(&self, variant: &Variant) -> Result<(), StorageError> {
        if variant.stock < 0 {
            return Err(StorageError::ConstraintViolation(format!(
                "negative stock for {}",
                variant.sku
            )));
        }
        let result = self.tx.execute(
            "INSERT INTO variants (variant_id, sku, stock) VALUES (?1, ?2, ?3)",
            params![variant.id.as_bytes().as_slice(), variant.sku, variant.stock],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ConstraintViolation(format!(
                    "duplicate sku {}",
                    variant.sku
                )))
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    /// Next value of the per-day job counter, starting at 1.
    pub fn next_job_seq(&self, day: NaiveDate) -> Result<u32, StorageError> {
        let seq: i64 = self.tx.query_row(
            "INSERT INTO job_sequences (day, last_seq) VALUES (?1, 1)
             ON CONFLICT(day) DO UPDATE SET last_seq = last_seq + 1
             RETURNING last_seq",
            params![date_text(day)],
            |row| row.get(0),
        )?;
        quantity_u32(seq)
    }

    pub fn insert_order(&self, order: &Order) -> Result<(), StorageError> {
        let slot = |d: Department| order.assignees.slot(d).map(|u| u.as_bytes().to_vec());
        let sql = format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                ?31, ?32)"
        );
        let f = &order.financials;
        let b = &order.backorder;
        self.tx.execute(
            &sql,
            params![
                order.id.as_bytes().as_slice(),
                order.job_code.as_str(),
                order.customer.name,
                order.customer.phone,
                order.notes,
                order.status.as_str(),
                order.sales_id.as_bytes().as_slice(),
                slot(Department::Graphic),
                slot(Department::Stock),
                slot(Department::Production),
                slot(Department::Qc),
                f.total_price.to_string(),
                f.paid_amount.to_string(),
                f.legacy_deposit.to_string(),
                f.payment_method.as_str(),
                b.status.as_str(),
                b.eta.map(date_text),
                b.eta_revisions,
                b.reason,
                order.is_urgent,
                order.urgent_note,
                order.tracking_no,
                order.artwork_ref,
                order.production_file_ref,
                spec_value::to_msgpack(&order.specs)?,
                order.due_date.map(date_text),
                order.created_at.timestamp_millis(),
                order.updated_at.timestamp_millis(),
                order.production_started_at.map(|t| t.timestamp_millis()),
                order.production_completed_at.map(|t| t.timestamp_millis()),
                order.qc.rejections,
                order.qc.damaged,
            ],
        )?;
        Ok(())
    }

    pub fn insert_item(&self, order_id: OrderId, item: &LineItem) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT INTO order_items (order_id, line_no, variant_id, quantity, unit_price, specs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                order_id.as_bytes().as_slice(),
                item.line_no,
                item.variant_id.as_bytes().as_slice(),
                item.quantity,
                item.unit_price.to_string(),
                spec_value::to_msgpack(&item.specs)?,
            ],
        )?;
        Ok(())
    }

    /// Decrements stock only if at least `quantity` remains. Returns false
    /// when the guard did not match.
    pub fn consume_stock(&self, variant_id: VariantId, quantity: u32) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE variants SET stock = stock - ?1 WHERE variant_id = ?2 AND stock >= ?1",
            params![quantity, variant_id.as_bytes().as_slice()],
        )?;
        Ok(n == 1)
    }

    /// Takes up to `wanted` units and returns how many were taken.
    pub fn take_stock(&self, variant_id: VariantId, wanted: u32) -> Result<u32, StorageError> {
        let available = reads::get_variant(self.conn(), variant_id)?
            .ok_or_else(|| StorageError::NotFound(format!("variant {variant_id}")))?
            .stock;
        let take = u32::try_from(available.max(0)).unwrap_or(u32::MAX).min(wanted);
        if take == 0 {
            return Ok(0);
        }
        if self.consume_stock(variant_id, take)? {
            Ok(take)
        } else {
            Err(StorageError::ConstraintViolation(format!(
                "stock for {variant_id} changed during reservation"
            )))
        }
    }

    pub fn add_stock(&self, variant_id: VariantId, quantity: u32) -> Result<(), StorageError> {
        let n = self.tx.execute(
            "UPDATE variants SET stock = stock + ?1 WHERE variant_id = ?2",
            params![quantity, variant_id.as_bytes().as_slice()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound(format!("variant {variant_id}")));
        }
        Ok(())
    }

    pub fn insert_purchase_request(&self, request: &PurchaseRequest) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT INTO purchase_requests (request_id, order_id, variant_id, quantity, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id.as_bytes().as_slice(),
                request.order_id.as_bytes().as_slice(),
                request.variant_id.as_bytes().as_slice(),
                request.quantity,
                request.status.as_str(),
                request.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Marks a pending request completed. Returns false if it was not pending.
    pub fn complete_request(
        &self,
        request_id: PurchaseRequestId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE purchase_requests SET status = 'COMPLETED', completed_at = ?1
             WHERE request_id = ?2 AND status = 'PENDING'",
            params![at.timestamp_millis(), request_id.as_bytes().as_slice()],
        )?;
        Ok(n == 1)
    }

    pub fn count_pending_requests(&self, order_id: OrderId) -> Result<u32, StorageError> {
        let n: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM purchase_requests WHERE order_id = ?1 AND status = 'PENDING'",
            params![order_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        quantity_u32(n)
    }

    /// Compare-and-set on one department slot: succeeds only while the order
    /// is still in `expected` and the slot is empty or already `user`.
    pub fn claim_slot(
        &self,
        order_id: OrderId,
        department: Department,
        user: UserId,
        expected: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let col = slot_column(department);
        let sql = format!(
            "UPDATE orders SET {col} = ?1, updated_at = ?2
             WHERE order_id = ?3 AND status = ?4 AND ({col} IS NULL OR {col} = ?1)"
        );
        let n = self.tx.execute(
            &sql,
            params![
                user.as_bytes().as_slice(),
                at.timestamp_millis(),
                order_id.as_bytes().as_slice(),
                expected.as_str(),
            ],
        )?;
        Ok(n == 1)
    }

    /// Clears a slot. Returns the previous holder, if any.
    pub fn release_slot(
        &self,
        order_id: OrderId,
        department: Department,
        at: DateTime<Utc>,
    ) -> Result<Option<UserId>, StorageError> {
        let col = slot_column(department);
        let prev: Option<Vec<u8>> = self
            .tx
            .query_row(
                &format!("SELECT {col} FROM orders WHERE order_id = ?1"),
                params![order_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        if prev.is_none() {
            return Ok(None);
        }
        self.tx.execute(
            &format!("UPDATE orders SET {col} = NULL, updated_at = ?1 WHERE order_id = ?2"),
            params![at.timestamp_millis(), order_id.as_bytes().as_slice()],
        )?;
        Ok(opt_array(prev, col)?.map(UserId::from_bytes))
    }

    /// Status compare-and-set. Returns false if the order moved on.
    pub fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE order_id = ?3 AND status = ?4",
            params![
                next.as_str(),
                at.timestamp_millis(),
                order_id.as_bytes().as_slice(),
                expected.as_str(),
            ],
        )?;
        Ok(n == 1)
    }

    /// Writes the production start only while it is unset.
    pub fn set_production_started(
        &self,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE orders SET production_started_at = ?1
             WHERE order_id = ?2 AND production_started_at IS NULL",
            params![at.timestamp_millis(), order_id.as_bytes().as_slice()],
        )?;
        Ok(n == 1)
    }

    /// Writes the production completion only while it is unset.
    pub fn set_production_completed(
        &self,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE orders SET production_completed_at = ?1
             WHERE order_id = ?2 AND production_completed_at IS NULL",
            params![at.timestamp_millis(), order_id.as_bytes().as_slice()],
        )?;
        Ok(n == 1)
    }

    /// Counts one failed quality check and the pieces it found damaged.
    pub fn record_qc_failure(&self, order_id: OrderId, damaged: u32) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE orders SET rejection_count = rejection_count + 1,
                damaged_count = damaged_count + ?1
             WHERE order_id = ?2",
            params![damaged, order_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    pub fn set_tracking(&self, order_id: OrderId, tracking_no: &str) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE orders SET tracking_no = ?1 WHERE order_id = ?2",
            params![tracking_no, order_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    pub fn touch(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE orders SET updated_at = ?1 WHERE order_id = ?2",
            params![at.timestamp_millis(), order_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    pub fn update_financials(
        &self,
        order_id: OrderId,
        financials: &Financials,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE orders SET paid_amount = ?1, payment_method = ?2, updated_at = ?3
             WHERE order_id = ?4",
            params![
                financials.paid_amount.to_string(),
                financials.payment_method.as_str(),
                at.timestamp_millis(),
                order_id.as_bytes().as_slice(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_payment(&self, entry: &PaymentEntry) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT INTO payment_entries
             (payment_id, order_id, amount, method, evidence_ref, note, uploaded_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.as_bytes().as_slice(),
                entry.order_id.as_bytes().as_slice(),
                entry.amount.to_string(),
                entry.method.as_str(),
                entry.evidence_ref,
                entry.note,
                entry.uploaded_by.as_bytes().as_slice(),
                entry.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn set_backorder(
        &self,
        order_id: OrderId,
        state: &BackorderState,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE orders SET backorder_status = ?1, backorder_eta = ?2, eta_revisions = ?3,
                backorder_reason = ?4, updated_at = ?5
             WHERE order_id = ?6",
            params![
                state.status.as_str(),
                state.eta.map(date_text),
                state.eta_revisions,
                state.reason,
                at.timestamp_millis(),
                order_id.as_bytes().as_slice(),
            ],
        )?;
        Ok(())
    }

    /// Backorder status compare-and-set; leaves `updated_at` alone so
    /// system promotions do not count as order activity.
    pub fn advance_backorder(
        &self,
        order_id: OrderId,
        expected: BackorderStatus,
        next: BackorderStatus,
    ) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE orders SET backorder_status = ?1 WHERE order_id = ?2 AND backorder_status = ?3",
            params![next.as_str(), order_id.as_bytes().as_slice(), expected.as_str()],
        )?;
        Ok(n == 1)
    }

    pub fn set_urgent(
        &self,
        order_id: OrderId,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE orders SET is_urgent = 1, urgent_note = COALESCE(?1, urgent_note), updated_at = ?2
             WHERE order_id = ?3",
            params![note, at.timestamp_millis(), order_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    /// Marks a still-stale order urgent. Returns false if it was touched,
    /// finished or already urgent since it was selected.
    pub fn escalate_stale(
        &self,
        order_id: OrderId,
        cutoff: DateTime<Utc>,
        note: &str,
    ) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE orders SET is_urgent = 1, urgent_note = ?1
             WHERE order_id = ?2 AND is_urgent = 0 AND updated_at < ?3
               AND status NOT IN ('COMPLETED', 'CANCELLED')",
            params![note, order_id.as_bytes().as_slice(), cutoff.timestamp_millis()],
        )?;
        Ok(n == 1)
    }

    pub fn update_specs(
        &self,
        order_id: OrderId,
        specs: &SpecPayload,
        artwork_ref: Option<&str>,
        production_file_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE orders SET specs = ?1, artwork_ref = COALESCE(?2, artwork_ref),
                production_file_ref = COALESCE(?3, production_file_ref), updated_at = ?4
             WHERE order_id = ?5",
            params![
                spec_value::to_msgpack(specs)?,
                artwork_ref,
                production_file_ref,
                at.timestamp_millis(),
                order_id.as_bytes().as_slice(),
            ],
        )?;
        Ok(())
    }

    pub fn update_item_specs(
        &self,
        order_id: OrderId,
        line_no: u32,
        specs: &SpecPayload,
    ) -> Result<bool, StorageError> {
        let n = self.tx.execute(
            "UPDATE order_items SET specs = ?1 WHERE order_id = ?2 AND line_no = ?3",
            params![
                spec_value::to_msgpack(specs)?,
                order_id.as_bytes().as_slice(),
                line_no,
            ],
        )?;
        Ok(n == 1)
    }

    /// Appends one hash-chained audit entry.
    pub fn append_audit(
        &self,
        order_id: Option<OrderId>,
        actor: Option<UserId>,
        action: AuditAction,
        detail: &str,
        at: DateTime<Utc>,
    ) -> Result<AuditEntry, StorageError> {
        let last: Option<(i64, Vec<u8>)> = self
            .tx
            .query_row(
                "SELECT seq, entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (seq, prev) = match last {
            Some((seq, hash)) => (seq + 1, to_array::<32>(hash, "entry_hash")?),
            None => (1, GENESIS_HASH),
        };
        let entry = AuditEntry {
            seq,
            order_id,
            actor,
            action,
            detail: detail.to_string(),
            at,
        };
        let hash = audit_hash(&prev, &entry);
        self.tx.execute(
            "INSERT INTO audit_log (seq, order_id, actor_id, action, detail, at, prev_hash, entry_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                seq,
                order_id.map(|id| id.as_bytes().to_vec()),
                actor.map(|id| id.as_bytes().to_vec()),
                action.as_str(),
                entry.detail,
                at.timestamp_millis(),
                prev.as_slice(),
                hash.as_slice(),
            ],
        )?;
        Ok(entry)
    }
}
