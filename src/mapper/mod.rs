//! Projection of document nodes onto flat, serializable records.
//!
//! A record copies the scalars of one node and, one level deep, the
//! scalars of the children it holds by composition. References are never
//! followed. Any drift between a record and the schema surfaces as
//! [`DbError::Conversion`].

mod records;

use crate::core::{DbError, Result, Value};
use crate::document::NodeRef;

pub use records::{
    AssetReferenceRecord, CaveRecord, CoordinatesRecord, DefectRecord,
    EnvironmentConditionRecord, ExhibitRecord, InscriptionRecord, MuralRecord, PaintingRecord,
    ParameterRecord, StatueRecord,
};

pub trait Record: Default + Sized {
    /// Schema type (or supertype) the record projects.
    const TYPE_NAME: &'static str;
    const RECORD_NAME: &'static str;

    fn copy_scalars(&mut self, node: NodeRef<'_>) -> Result<()>;

    fn copy_children(&mut self, _node: NodeRef<'_>) -> Result<()> {
        Ok(())
    }
}

/// Converts a node into `R`; `None` maps to `None`.
pub fn to_record<R: Record>(node: Option<NodeRef<'_>>) -> Result<Option<R>> {
    let Some(node) = node else {
        return Ok(None);
    };
    let mut record = scalars_only::<R>(node)?;
    record
        .copy_children(node)
        .map_err(|e| DbError::conversion(R::RECORD_NAME, e))?;
    Ok(Some(record))
}

fn scalars_only<R: Record>(node: NodeRef<'_>) -> Result<R> {
    let schema = node.document().schema();
    if !schema.conforms_to(node.type_name(), R::TYPE_NAME) {
        return Err(DbError::conversion(
            R::RECORD_NAME,
            DbError::TypeMismatch(format!(
                "node '{}' is a {}, not a {}",
                node.gid(),
                node.type_name(),
                R::TYPE_NAME
            )),
        ));
    }
    let mut record = R::default();
    record
        .copy_scalars(node)
        .map_err(|e| DbError::conversion(R::RECORD_NAME, e))?;
    Ok(record)
}

// ============================================================================
// Attribute coercion
// ============================================================================

/// Field types a record can hold. `Null` becomes the field's default.
pub trait FromAttribute: Sized {
    fn from_attribute(value: &Value) -> Result<Self>;
}

fn not_coercible(value: &Value, target: &str) -> DbError {
    DbError::TypeMismatch(format!("cannot store {} in a {} field", value.type_name(), target))
}

impl FromAttribute for String {
    fn from_attribute(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Text(s) | Value::Enum(s) => Ok(s.clone()),
            other => Err(not_coercible(other, "string")),
        }
    }
}

impl FromAttribute for bool {
    fn from_attribute(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Boolean(b) => Ok(*b),
            other => Err(not_coercible(other, "boolean")),
        }
    }
}

macro_rules! numeric_from_attribute {
    ($($ty:ty),*) => {
        $(
            impl FromAttribute for $ty {
                fn from_attribute(value: &Value) -> Result<Self> {
                    match value {
                        Value::Null => Ok(<$ty>::default()),
                        Value::Integer(i) => Ok(*i as $ty),
                        Value::Float(f) => Ok(*f as $ty),
                        other => Err(not_coercible(other, stringify!($ty))),
                    }
                }
            }
        )*
    };
}

numeric_from_attribute!(i32, i64, f32, f64);

impl<T: FromAttribute> FromAttribute for Option<T> {
    fn from_attribute(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_attribute(other).map(Some),
        }
    }
}

// ============================================================================
// Composed children
// ============================================================================

/// Record fields filled from a composition: `Option<R>` or `Vec<R>`.
pub trait ChildSlot: Sized {
    fn collect(node: NodeRef<'_>, relationship: &str) -> Result<Self>;
}

impl<R: Record> ChildSlot for Option<R> {
    fn collect(node: NodeRef<'_>, relationship: &str) -> Result<Self> {
        node.composed(relationship)?
            .into_iter()
            .next()
            .map(scalars_only::<R>)
            .transpose()
    }
}

impl<R: Record> ChildSlot for Vec<R> {
    fn collect(node: NodeRef<'_>, relationship: &str) -> Result<Self> {
        node.composed(relationship)?
            .into_iter()
            .map(scalars_only::<R>)
            .collect()
    }
}

/// Declares a record struct and its [`Record`] impl.
///
/// ```ignore
/// record! {
///     /// Surface defect.
///     pub struct DefectRecord("Defect") {
///         name: String = "name",
///         affected_area: f64 = "affectedArea",
///     }
///     children {
///         reference: Option<AssetReferenceRecord> = "reference",
///     }
/// }
/// ```
#[macro_export]
macro_rules! record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($type_name:literal) {
            $( $field:ident : $fty:ty = $attr:literal ),* $(,)?
        }
        $( children {
            $( $child:ident : $cty:ty = $rel:literal ),* $(,)?
        } )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        $vis struct $name {
            pub gid: String,
            $( pub $field: $fty, )*
            $($( pub $child: $cty, )*)?
        }

        impl $crate::mapper::Record for $name {
            const TYPE_NAME: &'static str = $type_name;
            const RECORD_NAME: &'static str = stringify!($name);

            fn copy_scalars(
                &mut self,
                node: $crate::document::NodeRef<'_>,
            ) -> $crate::core::Result<()> {
                self.gid = node.gid().to_string();
                $(
                    self.$field = <$fty as $crate::mapper::FromAttribute>::from_attribute(
                        node.attribute($attr)?,
                    )?;
                )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn copy_children(
                &mut self,
                node: $crate::document::NodeRef<'_>,
            ) -> $crate::core::Result<()> {
                $($(
                    self.$child = <$cty as $crate::mapper::ChildSlot>::collect(node, $rel)?;
                )*)?
                Ok(())
            }
        }
    };
}
