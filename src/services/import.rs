use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

use calamine::{Data, Reader, Xlsx};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    auth::{AdminGuard, AuthSession},
    db::DbPool,
    entities::product,
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Whole files with more data rows than this are rejected outright.
pub const MAX_IMPORT_ROWS: usize = 1000;
/// Uploads above this byte count fail before parsing.
pub const MAX_IMPORT_BYTES: usize = 5 * 1024 * 1024;

pub const DEFAULT_STOCK: i32 = 0;
pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 5;

const MAX_SKU_LEN: usize = 100;
const MAX_NAME_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 2000;

/// Logical spreadsheet fields, resolved from header labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ImportField {
    Sku,
    Name,
    Price,
    Category,
    Images,
    Description,
    IsActive,
    Stock,
    LowStockThreshold,
}

impl ImportField {
    const REQUIRED: [ImportField; 5] = [
        ImportField::Sku,
        ImportField::Name,
        ImportField::Price,
        ImportField::Category,
        ImportField::Images,
    ];

    fn label(self) -> &'static str {
        match self {
            ImportField::Sku => "external_id",
            ImportField::Name => "name",
            ImportField::Price => "price",
            ImportField::Category => "category",
            ImportField::Images => "images",
            ImportField::Description => "description",
            ImportField::IsActive => "isActive",
            ImportField::Stock => "stock",
            ImportField::LowStockThreshold => "low_stock_threshold",
        }
    }
}

/// Header alias table: normalized (lowercased, trimmed) label to logical
/// field. Covers snake_case variants and the Vietnamese labels the source
/// spreadsheets historically used.
static HEADER_ALIASES: &[(&str, ImportField)] = &[
    ("external_id", ImportField::Sku),
    ("externalid", ImportField::Sku),
    ("sku", ImportField::Sku),
    ("mã sản phẩm", ImportField::Sku),
    ("ma san pham", ImportField::Sku),
    ("name", ImportField::Name),
    ("product_name", ImportField::Name),
    ("tên sản phẩm", ImportField::Name),
    ("tên", ImportField::Name),
    ("price", ImportField::Price),
    ("giá", ImportField::Price),
    ("gia", ImportField::Price),
    ("category", ImportField::Category),
    ("danh mục", ImportField::Category),
    ("danh muc", ImportField::Category),
    ("images", ImportField::Images),
    ("image_urls", ImportField::Images),
    ("hình ảnh", ImportField::Images),
    ("hinh anh", ImportField::Images),
    ("description", ImportField::Description),
    ("mô tả", ImportField::Description),
    ("mo ta", ImportField::Description),
    ("isactive", ImportField::IsActive),
    ("is_active", ImportField::IsActive),
    ("active", ImportField::IsActive),
    ("kích hoạt", ImportField::IsActive),
    ("stock", ImportField::Stock),
    ("tồn kho", ImportField::Stock),
    ("ton kho", ImportField::Stock),
    ("low_stock_threshold", ImportField::LowStockThreshold),
    ("lowstockthreshold", ImportField::LowStockThreshold),
    ("ngưỡng tồn kho", ImportField::LowStockThreshold),
];

fn match_header(raw: &str) -> Option<ImportField> {
    let normalized = raw.trim().to_lowercase();
    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, field)| *field)
}

/// Tolerant boolean vocabulary for the active flag.
fn parse_flexible_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    // Spreadsheet numerics often surface as floats ("1000.0")
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

/// Image cells may contain comma- or newline-separated URLs; both are in
/// circulation.
fn split_image_list(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

/// A validated, importable product row. Transient: the input to the
/// differential upsert, never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub category: String,
    pub images: Vec<String>,
    pub is_active: bool,
    pub stock: i32,
    pub low_stock_threshold: i32,
}

/// Validation failure scoped to one spreadsheet row. Row 0 marks
/// file-level problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: u32,
    pub messages: Vec<String>,
}

impl RowError {
    fn file_level(message: impl Into<String>) -> Self {
        Self {
            row: 0,
            messages: vec![message.into()],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportParseOutcome {
    pub rows: Vec<ImportRow>,
    pub errors: Vec<RowError>,
}

/// Parses an uploaded spreadsheet buffer into validated product rows plus
/// row-level errors. Deterministic, and never fails outright: malformed
/// input degrades to a single file-level error entry.
pub fn parse_product_import_sheet(buf: &[u8]) -> ImportParseOutcome {
    let mut outcome = ImportParseOutcome::default();

    let mut workbook = match Xlsx::new(Cursor::new(buf)) {
        Ok(wb) => wb,
        Err(_) => {
            outcome
                .errors
                .push(RowError::file_level("The file is corrupted or not a valid spreadsheet"));
            return outcome;
        }
    };

    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(_)) => {
            outcome
                .errors
                .push(RowError::file_level("The file is corrupted or not a valid spreadsheet"));
            return outcome;
        }
        None => {
            outcome
                .errors
                .push(RowError::file_level("The first worksheet is missing"));
            return outcome;
        }
    };

    let mut rows_iter = range.rows();
    let header = match rows_iter.next() {
        Some(header) if header.iter().any(|c| !cell_to_string(c).is_empty()) => header,
        _ => {
            outcome
                .errors
                .push(RowError::file_level("The header row is missing"));
            return outcome;
        }
    };

    let mut columns: HashMap<ImportField, usize> = HashMap::new();
    for (idx, cell) in header.iter().enumerate() {
        if let Some(field) = match_header(&cell_to_string(cell)) {
            columns.entry(field).or_insert(idx);
        }
    }

    let missing: Vec<&str> = ImportField::REQUIRED
        .iter()
        .filter(|f| !columns.contains_key(f))
        .map(|f| f.label())
        .collect();
    if !missing.is_empty() {
        outcome.errors.push(RowError::file_level(format!(
            "Missing required columns: {}",
            missing.join(", ")
        )));
        return outcome;
    }

    let data_rows: Vec<&[Data]> = rows_iter.collect();
    if data_rows.len() > MAX_IMPORT_ROWS {
        outcome.errors.push(RowError::file_level(format!(
            "Too many rows: {} exceeds the maximum of {}",
            data_rows.len(),
            MAX_IMPORT_ROWS
        )));
        return outcome;
    }

    let field_of = |row: &[Data], field: ImportField| -> String {
        columns
            .get(&field)
            .and_then(|&idx| row.get(idx))
            .map(cell_to_string)
            .unwrap_or_default()
    };

    let mut seen_skus: HashSet<String> = HashSet::new();

    for (i, row) in data_rows.iter().enumerate() {
        // Header is spreadsheet row 1; data starts at row 2
        let row_number = (i + 2) as u32;

        if row.iter().all(|c| cell_to_string(c).is_empty()) {
            continue;
        }

        let sku = field_of(row, ImportField::Sku);
        let name = field_of(row, ImportField::Name);
        let category = field_of(row, ImportField::Category);
        let description = Some(field_of(row, ImportField::Description)).filter(|d| !d.is_empty());
        let price_raw = field_of(row, ImportField::Price);
        let images = split_image_list(&field_of(row, ImportField::Images));
        let is_active =
            parse_flexible_bool(&field_of(row, ImportField::IsActive)).unwrap_or(true);
        let stock = parse_integer(&field_of(row, ImportField::Stock))
            .and_then(|v| i32::try_from(v).ok())
            .filter(|v| *v >= 0)
            .unwrap_or(DEFAULT_STOCK);
        let low_stock_threshold = parse_integer(&field_of(row, ImportField::LowStockThreshold))
            .and_then(|v| i32::try_from(v).ok())
            .filter(|v| *v >= 0)
            .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);

        let mut messages: Vec<String> = Vec::new();

        if sku.is_empty() {
            messages.push("external_id is required".to_string());
        } else if sku.chars().count() > MAX_SKU_LEN {
            messages.push(format!(
                "external_id cannot exceed {} characters",
                MAX_SKU_LEN
            ));
        } else if !seen_skus.insert(sku.clone()) {
            messages.push(format!("duplicate external_id in file: {}", sku));
        }

        if name.is_empty() {
            messages.push("name is required".to_string());
        } else if name.chars().count() > MAX_NAME_LEN {
            messages.push(format!("name cannot exceed {} characters", MAX_NAME_LEN));
        }

        let price = match parse_integer(&price_raw) {
            Some(p) if p > 0 => Some(p),
            _ => {
                messages.push("price must be a positive integer".to_string());
                None
            }
        };

        if category.is_empty() {
            messages.push("category is required".to_string());
        }

        if images.is_empty() {
            messages.push("at least one image is required".to_string());
        }
        for image in &images {
            match Url::parse(image) {
                Ok(parsed) if parsed.scheme() == "https" => {}
                Ok(_) => messages.push(format!("image URL must use https: {}", image)),
                Err(_) => messages.push(format!("invalid image URL: {}", image)),
            }
        }

        if let Some(d) = &description {
            if d.chars().count() > MAX_DESCRIPTION_LEN {
                messages.push(format!(
                    "description cannot exceed {} characters",
                    MAX_DESCRIPTION_LEN
                ));
            }
        }

        if messages.is_empty() {
            outcome.rows.push(ImportRow {
                sku,
                name,
                description,
                price: price.expect("validated above"),
                category,
                images,
                is_active,
                stock,
                low_stock_threshold,
            });
        } else {
            outcome.errors.push(RowError {
                row: row_number,
                messages,
            });
        }
    }

    outcome
}

/// An uploaded spreadsheet artifact.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: u64,
    pub updated: u64,
    pub errors: Vec<RowError>,
}

/// Bulk import: parse, then differential upsert against the catalog.
#[derive(Clone)]
pub struct ImportService {
    db: Arc<DbPool>,
    admin_guard: Arc<AdminGuard>,
    event_sender: Option<Arc<EventSender>>,
}

impl ImportService {
    pub fn new(
        db: Arc<DbPool>,
        admin_guard: Arc<AdminGuard>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            admin_guard,
            event_sender,
        }
    }

    /// Upserts every valid row from the uploaded spreadsheet in a single
    /// transaction, matching on the external identifier.
    ///
    /// Bad rows are skipped and reported; the upsert batch itself is
    /// all-or-nothing. The existence lookup and the upsert transaction
    /// are deliberately not atomic with each other: upsert by unique key
    /// is idempotent and self-correcting.
    #[instrument(skip(self, session, upload), fields(file_name = %upload.file_name, bytes = upload.bytes.len()))]
    pub async fn bulk_upsert_products(
        &self,
        session: &AuthSession,
        upload: FileUpload,
    ) -> Result<ImportReport, ServiceError> {
        let admin = self.admin_guard.require_admin(session)?;

        if upload.bytes.len() > MAX_IMPORT_BYTES {
            return Err(ServiceError::InvalidInput(format!(
                "File exceeds the {} MB size limit",
                MAX_IMPORT_BYTES / (1024 * 1024)
            )));
        }
        if !upload.file_name.to_ascii_lowercase().ends_with(".xlsx") {
            return Err(ServiceError::InvalidInput(
                "Only .xlsx files are supported".to_string(),
            ));
        }

        let outcome = parse_product_import_sheet(&upload.bytes);

        if outcome.rows.is_empty() {
            // Surface the most actionable problem
            let message = outcome
                .errors
                .first()
                .and_then(|e| e.messages.first().cloned())
                .unwrap_or_else(|| "The file contains no importable rows".to_string());
            return Err(ServiceError::InvalidInput(message));
        }

        let skus: Vec<String> = outcome.rows.iter().map(|r| r.sku.clone()).collect();
        let existing: HashMap<String, product::Model> = product::Entity::find()
            .filter(product::Column::Sku.is_in(skus))
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to look up existing products for import");
                ServiceError::DatabaseError(e)
            })?
            .into_iter()
            .map(|m| (m.sku.clone(), m))
            .collect();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin import transaction");
            ServiceError::DatabaseError(e)
        })?;

        let mut created: u64 = 0;
        let mut updated: u64 = 0;

        for row in &outcome.rows {
            let images = serde_json::json!(row.images);
            match existing.get(&row.sku) {
                Some(model) => {
                    let mut active: product::ActiveModel = model.clone().into();
                    active.name = Set(row.name.clone());
                    active.description = Set(row.description.clone());
                    active.price = Set(row.price);
                    active.category = Set(row.category.clone());
                    active.images = Set(images);
                    active.is_active = Set(row.is_active);
                    active.stock = Set(row.stock);
                    active.low_stock_threshold = Set(row.low_stock_threshold);
                    active.update(&txn).await.map_err(|e| {
                        error!(error = %e, sku = %row.sku, "Failed to update product during import");
                        ServiceError::DatabaseError(e)
                    })?;
                    updated += 1;
                }
                None => {
                    let active = product::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        sku: Set(row.sku.clone()),
                        name: Set(row.name.clone()),
                        description: Set(row.description.clone()),
                        price: Set(row.price),
                        category: Set(row.category.clone()),
                        images: Set(images),
                        is_active: Set(row.is_active),
                        stock: Set(row.stock),
                        low_stock_threshold: Set(row.low_stock_threshold),
                        ..Default::default()
                    };
                    active.insert(&txn).await.map_err(|e| {
                        error!(error = %e, sku = %row.sku, "Failed to insert product during import");
                        ServiceError::DatabaseError(e)
                    })?;
                    created += 1;
                }
            }
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit import transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            created,
            updated,
            skipped = outcome.errors.len(),
            admin = %admin.email,
            "Product import completed"
        );

        if let Some(event_sender) = &self.event_sender {
            let event = Event::ProductsImported {
                created,
                updated,
                skipped: outcome.errors.len(),
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send products imported event");
            }
        }

        Ok(ImportReport {
            created,
            updated,
            errors: outcome.errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("external_id", Some(ImportField::Sku))]
    #[case("SKU", Some(ImportField::Sku))]
    #[case("Mã Sản Phẩm", Some(ImportField::Sku))]
    #[case("  Name ", Some(ImportField::Name))]
    #[case("tên", Some(ImportField::Name))]
    #[case("PRICE", Some(ImportField::Price))]
    #[case("giá", Some(ImportField::Price))]
    #[case("isActive", Some(ImportField::IsActive))]
    #[case("IS_ACTIVE", Some(ImportField::IsActive))]
    #[case("low_stock_threshold", Some(ImportField::LowStockThreshold))]
    #[case("tồn kho", Some(ImportField::Stock))]
    #[case("unrelated", None)]
    fn header_aliases(#[case] raw: &str, #[case] expected: Option<ImportField>) {
        assert_eq!(match_header(raw), expected, "{}", raw);
    }

    #[rstest]
    #[case("true", Some(true))]
    #[case("TRUE", Some(true))]
    #[case("1", Some(true))]
    #[case("yes", Some(true))]
    #[case("Y", Some(true))]
    #[case("false", Some(false))]
    #[case("0", Some(false))]
    #[case("No", Some(false))]
    #[case("n", Some(false))]
    #[case("", None)]
    #[case("maybe", None)]
    fn boolean_vocabulary(#[case] raw: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_flexible_bool(raw), expected, "{}", raw);
    }

    #[test]
    fn image_list_splits_on_commas_and_newlines() {
        let urls = split_image_list("https://a.test/1.jpg, https://a.test/2.jpg\nhttps://a.test/3.jpg\n");
        assert_eq!(
            urls,
            vec![
                "https://a.test/1.jpg",
                "https://a.test/2.jpg",
                "https://a.test/3.jpg"
            ]
        );
    }

    #[test]
    fn integer_parsing_tolerates_spreadsheet_floats() {
        assert_eq!(parse_integer("1000"), Some(1000));
        assert_eq!(parse_integer("1000.0"), Some(1000));
        assert_eq!(parse_integer(" 7 "), Some(7));
        assert_eq!(parse_integer("12.5"), None);
        assert_eq!(parse_integer("abc"), None);
        assert_eq!(parse_integer(""), None);
    }

    #[test]
    fn corrupted_buffer_yields_single_file_level_error() {
        let outcome = parse_product_import_sheet(b"definitely not a workbook");
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, 0);
        assert!(outcome.errors[0].messages[0].contains("corrupted"));
    }
}
