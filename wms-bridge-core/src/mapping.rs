//! Table-driven mapping profiles.
//!
//! Each entity kind and upload flow is described by a static profile: which
//! source fields identify it, which fields are carried over (renamed and typed),
//! and which detail collection belongs to it. One generic [`EntityMapper`]
//! implementation serves all six entity kinds, so the sync algorithm is written
//! once and only the data differs.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::contract::MappedEntity;
use crate::entity::{EntityKey, EntityKind, UploadFlow};
use crate::error::RecordError;
use crate::record::Record;
use crate::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Int,
    Decimal,
    Bool,
    Date,
}

/// Format check applied to a non-blank mapped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Any,
    Email,
    CountryCode,
    Positive,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub source: &'static str,
    pub target: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub format: Format,
}

impl FieldRule {
    pub const fn new(source: &'static str, target: &'static str, ty: FieldType) -> Self {
        Self {
            source,
            target,
            ty,
            required: false,
            format: Format::Any,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LineRule {
    pub source: &'static str,
    pub target: &'static str,
    pub fields: &'static [FieldRule],
    /// At least one line must be present.
    pub required: bool,
}

/// Maps one raw source record to the destination schema.
pub trait EntityMapper: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// The natural key, or `None` when an identifying field is missing, empty or zero.
    fn key(&self, record: &Record) -> Option<EntityKey>;

    /// Source modification time, used to place the watermark.
    fn modified_at(&self, record: &Record) -> Option<DateTime<Utc>>;

    /// Canonical content the change fingerprint is computed over: header plus all lines.
    fn projection(&self, record: &Record) -> Value;

    /// Builds the destination payload from the projection and validates it.
    fn map(&self, key: &EntityKey, projection: &Value) -> Result<MappedEntity, RecordError>;

    /// URL of an attached binary asset, if the kind carries one.
    fn asset_url(&self, _record: &Record) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EntityProfile {
    pub kind: EntityKind,
    pub key_fields: &'static [&'static str],
    pub modified_field: &'static str,
    pub fields: &'static [FieldRule],
    pub lines: Option<LineRule>,
    pub asset_field: Option<&'static str>,
}

impl EntityMapper for EntityProfile {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn key(&self, record: &Record) -> Option<EntityKey> {
        EntityKey::from_parts(self.key_fields.iter().map(|f| record.as_text(f)))
    }

    fn modified_at(&self, record: &Record) -> Option<DateTime<Utc>> {
        record.as_date(self.modified_field)
    }

    fn projection(&self, record: &Record) -> Value {
        project(record, self.fields, self.lines.as_ref())
    }

    fn map(&self, key: &EntityKey, projection: &Value) -> Result<MappedEntity, RecordError> {
        validation::validate(self.fields, self.lines.as_ref(), projection)
            .map_err(RecordError::Validation)?;
        Ok(MappedEntity {
            key: key.clone(),
            payload: projection.clone(),
        })
    }

    fn asset_url(&self, record: &Record) -> Option<String> {
        self.asset_field
            .filter(|f| record.is_present(f))
            .map(|f| record.as_text(f))
    }
}

/// Reverse-flow profile: a completed WMS item mapped to an ERP document.
#[derive(Debug)]
pub struct UploadProfile {
    pub flow: UploadFlow,
    pub id_field: &'static str,
    pub completed_field: &'static str,
    pub fields: &'static [FieldRule],
    pub lines: Option<LineRule>,
}

impl UploadProfile {
    pub fn item_id(&self, record: &Record) -> Option<String> {
        let id = record.as_text(self.id_field);
        (!id.is_empty() && id != "0").then_some(id)
    }

    pub fn completed_at(&self, record: &Record) -> Option<DateTime<Utc>> {
        record.as_date(self.completed_field)
    }

    pub fn map(&self, record: &Record) -> Result<Value, RecordError> {
        let document = project(record, self.fields, self.lines.as_ref());
        validation::validate(self.fields, self.lines.as_ref(), &document)
            .map_err(RecordError::Validation)?;
        Ok(document)
    }
}

fn typed_value(record: &Record, rule: &FieldRule) -> Value {
    if !record.is_present(rule.source) {
        return Value::Null;
    }
    match rule.ty {
        FieldType::Text => Value::String(record.as_text(rule.source)),
        FieldType::Int => Value::Number(record.as_int(rule.source).into()),
        FieldType::Decimal => Number::from_f64(record.as_decimal(rule.source))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldType::Bool => Value::Bool(record.as_bool(rule.source)),
        FieldType::Date => record
            .as_date(rule.source)
            .map(|d| Value::String(d.to_rfc3339()))
            .unwrap_or(Value::Null),
    }
}

fn project_fields(record: &Record, fields: &[FieldRule]) -> Map<String, Value> {
    fields
        .iter()
        .map(|rule| (rule.target.to_string(), typed_value(record, rule)))
        .collect()
}

fn project(record: &Record, fields: &[FieldRule], lines: Option<&LineRule>) -> Value {
    let mut header = project_fields(record, fields);
    if let Some(rule) = lines {
        let rows = record
            .lines(rule.source)
            .iter()
            .map(|line| Value::Object(project_fields(line, rule.fields)))
            .collect();
        header.insert(rule.target.to_string(), Value::Array(rows));
    }
    Value::Object(header)
}

use FieldType::{Bool, Date, Decimal, Int, Text};

static ITEM_GROUP: EntityProfile = EntityProfile {
    kind: EntityKind::ItemGroup,
    key_fields: &["Code"],
    modified_field: "Modified",
    fields: &[
        FieldRule::new("Code", "code", Text).required(),
        FieldRule::new("Description", "name", Text).required(),
    ],
    lines: None,
    asset_field: None,
};

static ITEM: EntityProfile = EntityProfile {
    kind: EntityKind::Item,
    key_fields: &["Code"],
    modified_field: "Modified",
    fields: &[
        FieldRule::new("Code", "sku", Text).required(),
        FieldRule::new("Description", "name", Text).required(),
        FieldRule::new("Barcode", "barcode", Text),
        FieldRule::new("Unit", "unit", Text),
        FieldRule::new("NetWeight", "weight", Decimal),
        FieldRule::new("IsStockItem", "stock_managed", Bool),
        FieldRule::new("ItemGroupCode", "group_code", Text),
    ],
    lines: None,
    asset_field: Some("PictureUrl"),
};

static CUSTOMER: EntityProfile = EntityProfile {
    kind: EntityKind::Customer,
    key_fields: &["Code"],
    modified_field: "Modified",
    fields: &[
        FieldRule::new("Code", "customer_number", Text).required(),
        FieldRule::new("Name", "name", Text).required(),
        FieldRule::new("Email", "email", Text).format(Format::Email),
        FieldRule::new("Phone", "phone", Text),
        FieldRule::new("AddressLine1", "address", Text),
        FieldRule::new("Postcode", "zipcode", Text),
        FieldRule::new("City", "city", Text),
        FieldRule::new("Country", "country", Text).format(Format::CountryCode),
    ],
    lines: None,
    asset_field: None,
};

static SUPPLIER: EntityProfile = EntityProfile {
    kind: EntityKind::Supplier,
    key_fields: &["Code"],
    modified_field: "Modified",
    fields: &[
        FieldRule::new("Code", "supplier_number", Text).required(),
        FieldRule::new("Name", "name", Text).required(),
        FieldRule::new("Email", "email", Text).format(Format::Email),
        FieldRule::new("AddressLine1", "address", Text),
        FieldRule::new("Postcode", "zipcode", Text),
        FieldRule::new("City", "city", Text),
        FieldRule::new("Country", "country", Text).format(Format::CountryCode),
    ],
    lines: None,
    asset_field: None,
};

static SALES_ORDER: EntityProfile = EntityProfile {
    kind: EntityKind::SalesOrder,
    key_fields: &["OrderNumber"],
    modified_field: "Modified",
    fields: &[
        FieldRule::new("OrderNumber", "reference", Int).required(),
        FieldRule::new("OrderDate", "order_date", Date),
        FieldRule::new("DeliverToCode", "customer_number", Text).required(),
        FieldRule::new("DeliveryDate", "delivery_date", Date),
        FieldRule::new("Description", "remarks", Text),
    ],
    lines: Some(LineRule {
        source: "SalesOrderLines",
        target: "lines",
        fields: &[
            FieldRule::new("LineNumber", "line_number", Int),
            FieldRule::new("ItemCode", "sku", Text).required(),
            FieldRule::new("Quantity", "quantity", Decimal)
                .required()
                .format(Format::Positive),
        ],
        required: true,
    }),
    asset_field: None,
};

static PURCHASE_ORDER: EntityProfile = EntityProfile {
    kind: EntityKind::PurchaseOrder,
    key_fields: &["PurchaseOrderNumber"],
    modified_field: "Modified",
    fields: &[
        FieldRule::new("PurchaseOrderNumber", "reference", Int).required(),
        FieldRule::new("SupplierCode", "supplier_number", Text).required(),
        FieldRule::new("ReceiptDate", "expected_date", Date),
        FieldRule::new("Description", "remarks", Text),
    ],
    lines: Some(LineRule {
        source: "PurchaseOrderLines",
        target: "lines",
        fields: &[
            FieldRule::new("LineNumber", "line_number", Int),
            FieldRule::new("ItemCode", "sku", Text).required(),
            FieldRule::new("QuantityInPurchaseUnits", "quantity", Decimal)
                .required()
                .format(Format::Positive),
        ],
        required: true,
    }),
    asset_field: None,
};

pub fn entity_profile(kind: EntityKind) -> &'static EntityProfile {
    match kind {
        EntityKind::Item => &ITEM,
        EntityKind::ItemGroup => &ITEM_GROUP,
        EntityKind::Customer => &CUSTOMER,
        EntityKind::Supplier => &SUPPLIER,
        EntityKind::SalesOrder => &SALES_ORDER,
        EntityKind::PurchaseOrder => &PURCHASE_ORDER,
    }
}

static SHIPMENTS: UploadProfile = UploadProfile {
    flow: UploadFlow::Shipments,
    id_field: "shipment_id",
    completed_field: "completed_at",
    fields: &[
        FieldRule::new("order_reference", "SalesOrderNumber", Int).required(),
        FieldRule::new("completed_at", "DeliveryDate", Date).required(),
        FieldRule::new("tracking_code", "TrackingNumber", Text),
        FieldRule::new("carrier", "ShippingMethod", Text),
    ],
    lines: Some(LineRule {
        source: "products",
        target: "GoodsDeliveryLines",
        fields: &[
            FieldRule::new("order_line", "SalesOrderLineNumber", Int),
            FieldRule::new("sku", "Item", Text).required(),
            FieldRule::new("quantity", "QuantityDelivered", Decimal)
                .required()
                .format(Format::Positive),
        ],
        required: true,
    }),
};

static RECEIPTS: UploadProfile = UploadProfile {
    flow: UploadFlow::Receipts,
    id_field: "receipt_id",
    completed_field: "completed_at",
    fields: &[
        FieldRule::new("purchase_order_reference", "PurchaseOrderNumber", Int).required(),
        FieldRule::new("completed_at", "ReceiptDate", Date).required(),
        FieldRule::new("remarks", "Description", Text),
    ],
    lines: Some(LineRule {
        source: "products",
        target: "ReceiptLines",
        fields: &[
            FieldRule::new("order_line", "PurchaseOrderLineNumber", Int),
            FieldRule::new("sku", "Item", Text).required(),
            FieldRule::new("quantity_received", "QuantityReceived", Decimal)
                .required()
                .format(Format::Positive),
        ],
        required: true,
    }),
};

pub fn upload_profile(flow: UploadFlow) -> &'static UploadProfile {
    match flow {
        UploadFlow::Shipments => &SHIPMENTS,
        UploadFlow::Receipts => &RECEIPTS,
    }
}
