// DocType schema: ordered field descriptors plus doctype-level flags.
//
// Records arrive as `DocType` documents whose `fields` array holds one
// descriptor per field. Flags use the server's 0/1 encoding.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::de;
use crate::payload::PayloadError;
use crate::types::Document;

/// Doctype of schema records themselves.
pub const DOCTYPE_DOCTYPE: &str = "DocType";

/// Select options placeholder sent before the real choices are loaded.
pub const SELECT_PLACEHOLDERS: &[&str] = &["[Select]", "[Select][Select]"];

/// Field types understood by the mirror. Unrecognized names are preserved
/// in `Unknown` so a schema with newer control types still loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FieldType {
    #[default]
    Data,
    Link,
    DynamicLink,
    Select,
    Int,
    Float,
    Currency,
    Percent,
    Check,
    Date,
    Datetime,
    Time,
    Duration,
    Text,
    SmallText,
    LongText,
    TextEditor,
    Code,
    Password,
    ReadOnly,
    Attach,
    AttachImage,
    Color,
    Rating,
    Table,
    TableMultiSelect,
    SectionBreak,
    ColumnBreak,
    TabBreak,
    Html,
    Button,
    Image,
    Fold,
    Heading,
    Unknown(String),
}

const FIELD_TYPE_NAMES: &[(&str, FieldType)] = &[
    ("Data", FieldType::Data),
    ("Link", FieldType::Link),
    ("Dynamic Link", FieldType::DynamicLink),
    ("Select", FieldType::Select),
    ("Int", FieldType::Int),
    ("Float", FieldType::Float),
    ("Currency", FieldType::Currency),
    ("Percent", FieldType::Percent),
    ("Check", FieldType::Check),
    ("Date", FieldType::Date),
    ("Datetime", FieldType::Datetime),
    ("Time", FieldType::Time),
    ("Duration", FieldType::Duration),
    ("Text", FieldType::Text),
    ("Small Text", FieldType::SmallText),
    ("Long Text", FieldType::LongText),
    ("Text Editor", FieldType::TextEditor),
    ("Code", FieldType::Code),
    ("Password", FieldType::Password),
    ("Read Only", FieldType::ReadOnly),
    ("Attach", FieldType::Attach),
    ("Attach Image", FieldType::AttachImage),
    ("Color", FieldType::Color),
    ("Rating", FieldType::Rating),
    ("Table", FieldType::Table),
    ("Table MultiSelect", FieldType::TableMultiSelect),
    ("Section Break", FieldType::SectionBreak),
    ("Column Break", FieldType::ColumnBreak),
    ("Tab Break", FieldType::TabBreak),
    ("HTML", FieldType::Html),
    ("Button", FieldType::Button),
    ("Image", FieldType::Image),
    ("Fold", FieldType::Fold),
    ("Heading", FieldType::Heading),
];

impl FieldType {
    pub fn parse(name: &str) -> Self {
        FIELD_TYPE_NAMES
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, fieldtype)| fieldtype.clone())
            .unwrap_or_else(|| Self::Unknown(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        if let Self::Unknown(name) = self {
            return name;
        }
        FIELD_TYPE_NAMES
            .iter()
            .find(|(_, fieldtype)| fieldtype == self)
            .map(|(name, _)| *name)
            .unwrap_or("Data")
    }

    /// Child-table fields: the value is an ordered sequence of rows.
    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table | Self::TableMultiSelect)
    }

    /// Layout-only fields that never hold a value.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::SectionBreak
                | Self::ColumnBreak
                | Self::TabBreak
                | Self::Html
                | Self::Button
                | Self::Image
                | Self::Fold
                | Self::Heading
        )
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link | Self::DynamicLink)
    }

    /// Simple scalar types that a one-shot create intent may copy.
    pub fn accepts_create_intent(&self) -> bool {
        matches!(self, Self::Link | Self::Data | Self::Select | Self::DynamicLink)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Named per-field behavior attached to a descriptor at runtime, such as a
/// display formatter or a status resolver. Dispatched only when present.
pub trait FieldStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn format(&self, _value: &Value, _doc: &Document) -> Option<String> {
        None
    }

    fn status(&self, _doc: &Document) -> Option<String> {
        None
    }
}

#[derive(Clone, Default)]
pub struct StrategySlot(Option<Arc<dyn FieldStrategy>>);

impl StrategySlot {
    pub fn get(&self) -> Option<&Arc<dyn FieldStrategy>> {
        self.0.as_ref()
    }
}

impl fmt::Debug for StrategySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(strategy) => write!(f, "Some({})", strategy.name()),
            None => f.write_str("None"),
        }
    }
}

/// One field of a doctype.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub fieldname: String,
    #[serde(default)]
    pub fieldtype: FieldType,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Link target, newline-separated select choices, or a currency path.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, deserialize_with = "de::flag")]
    pub reqd: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub read_only: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub hidden: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub no_copy: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub no_default: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub remember_last_selected_value: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub ignore_user_permissions: bool,
    #[serde(skip)]
    pub strategy: StrategySlot,
    /// Last value produced by default resolution, kept for introspection.
    #[serde(skip)]
    pub resolved_default: Option<Value>,
}

impl FieldDescriptor {
    pub fn new(fieldname: impl Into<String>, fieldtype: FieldType) -> Self {
        Self { fieldname: fieldname.into(), fieldtype, ..Self::default() }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.reqd = true;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn FieldStrategy>) -> Self {
        self.strategy = StrategySlot(Some(strategy));
        self
    }

    /// Target doctype for Link and Table fields.
    pub fn link_target(&self) -> Option<&str> {
        self.options.as_deref().map(str::trim).filter(|target| !target.is_empty())
    }

    /// Newline-delimited select choices, unless options are still a placeholder.
    pub fn select_options(&self) -> Vec<&str> {
        match self.options.as_deref() {
            Some(options) if !SELECT_PLACEHOLDERS.contains(&options) => options.split('\n').collect(),
            _ => Vec::new(),
        }
    }

    /// Display form of a value: the attached strategy's formatter when one
    /// answers, else the plain scalar text.
    pub fn format_value(&self, value: &Value, doc: &Document) -> String {
        if let Some(formatted) = self.strategy.get().and_then(|strategy| strategy.format(value, doc)) {
            return formatted;
        }
        de::scalar_to_string(value).unwrap_or_default()
    }
}

/// Schema of one doctype.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocTypeSchema {
    pub name: String,
    /// Server modification stamp, sent back as `cached_timestamp`.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, deserialize_with = "de::flag")]
    pub istable: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub issingle: bool,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub autoname: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub title_field: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub default_print_format: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub default_view: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl DocTypeSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self { name: name.into(), fields, ..Self::default() }
    }

    /// Build a schema from a `DocType` record as delivered in a sync payload.
    pub fn from_record(record: &Document) -> Result<Self, PayloadError> {
        serde_json::from_value(record.to_value()).map_err(|error| PayloadError::InvalidSchema {
            doctype: record.name.clone(),
            message: error.to_string(),
        })
    }

    pub fn field(&self, fieldname: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.fieldname == fieldname)
    }

    pub fn field_mut(&mut self, fieldname: &str) -> Option<&mut FieldDescriptor> {
        self.fields.iter_mut().find(|field| field.fieldname == fieldname)
    }

    pub fn has_field(&self, fieldname: &str) -> bool {
        self.field(fieldname).is_some()
    }

    /// Child-table fields in schema order.
    pub fn table_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| field.fieldtype.is_table())
    }

    pub fn is_title_field(&self, fieldname: &str) -> bool {
        self.title_field.as_deref() == Some(fieldname)
    }
}
