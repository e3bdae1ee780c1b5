//! Static repository method declarations.
//!
//! A [`QueryMethod`] is the statically declared metadata of one repository
//! method: its name, declared parameters and return shape, plus the optional
//! annotations (explicit or native text, count text, projection target,
//! modifying flag, lock mode, read-only hint, eager-fetch paths).
//! Declarations are `const` values built with the `const fn` builders below.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Identifier,
    Integer,
    Text,
}

/// Declared type of one positional query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Scalar(ScalarType),
    /// Ordered sequence, bound as `(?, ?, ...)`.
    List(ScalarType),
}

impl ParamType {
    pub const ID: Self = Self::Scalar(ScalarType::Identifier);
    pub const INTEGER: Self = Self::Scalar(ScalarType::Integer);
    pub const TEXT: Self = Self::Scalar(ScalarType::Text);
    pub const TEXT_LIST: Self = Self::List(ScalarType::Text);
    pub const INTEGER_LIST: Self = Self::List(ScalarType::Integer);

    pub fn scalar(self) -> ScalarType {
        match self {
            Self::Scalar(scalar) | Self::List(scalar) => scalar,
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier => write!(f, "identifier"),
            Self::Integer => write!(f, "integer"),
            Self::Text => write!(f, "text"),
        }
    }
}

impl Display for ParamType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(scalar) => write!(f, "{scalar}"),
            Self::List(scalar) => write!(f, "list<{scalar}>"),
        }
    }
}

/// One declared method parameter. `name` binds `:name` placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: &'static str,
    pub ty: ParamType,
}

impl Param {
    pub const fn new(name: &'static str, ty: ParamType) -> Self {
        Self { name, ty }
    }

    pub const fn id(name: &'static str) -> Self {
        Self::new(name, ParamType::ID)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ParamType::INTEGER)
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ParamType::TEXT)
    }

    pub const fn text_list(name: &'static str) -> Self {
        Self::new(name, ParamType::TEXT_LIST)
    }
}

/// Declared return shape of a repository method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    /// Zero or one row; more is `TooManyResults`.
    One,
    List,
    /// Fixed-size page with a total count.
    Page,
    /// Page-like window exposing only `has_next`.
    Slice,
    /// Affected-row count of a modifying statement.
    RowCount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LockMode {
    #[default]
    None,
    PessimisticWrite,
}

/// Query text annotation attached to a method, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryText {
    /// Resolved through a named query or the method name.
    None,
    Explicit {
        text: &'static str,
        count: Option<&'static str>,
    },
    Native {
        text: &'static str,
        count: Option<&'static str>,
    },
}

/// Output shape a DTO or view projection expects: a name plus field labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectionTarget {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

impl ProjectionTarget {
    pub const fn new(name: &'static str, fields: &'static [&'static str]) -> Self {
        Self { name, fields }
    }
}

/// Static metadata of one repository method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryMethod {
    pub entity: &'static str,
    pub name: &'static str,
    pub returns: ReturnShape,
    pub params: &'static [Param],
    pub text: QueryText,
    pub projection: Option<ProjectionTarget>,
    pub modifying: bool,
    pub lock: LockMode,
    pub read_only: bool,
    pub fetch: &'static [&'static str],
}

impl QueryMethod {
    pub const fn new(entity: &'static str, name: &'static str, returns: ReturnShape) -> Self {
        Self {
            entity,
            name,
            returns,
            params: &[],
            text: QueryText::None,
            projection: None,
            modifying: false,
            lock: LockMode::None,
            read_only: false,
            fetch: &[],
        }
    }

    pub const fn params(self, params: &'static [Param]) -> Self {
        Self { params, ..self }
    }

    pub const fn query(self, text: &'static str) -> Self {
        Self {
            text: QueryText::Explicit { text, count: None },
            ..self
        }
    }

    pub const fn query_with_count(self, text: &'static str, count: &'static str) -> Self {
        Self {
            text: QueryText::Explicit {
                text,
                count: Some(count),
            },
            ..self
        }
    }

    pub const fn native(self, text: &'static str) -> Self {
        Self {
            text: QueryText::Native { text, count: None },
            ..self
        }
    }

    pub const fn native_with_count(self, text: &'static str, count: &'static str) -> Self {
        Self {
            text: QueryText::Native {
                text,
                count: Some(count),
            },
            ..self
        }
    }

    pub const fn projection(self, target: ProjectionTarget) -> Self {
        Self {
            projection: Some(target),
            ..self
        }
    }

    pub const fn modifying(self) -> Self {
        Self {
            modifying: true,
            ..self
        }
    }

    pub const fn lock(self, lock: LockMode) -> Self {
        Self { lock, ..self }
    }

    pub const fn read_only(self) -> Self {
        Self {
            read_only: true,
            ..self
        }
    }

    pub const fn fetch(self, fetch: &'static [&'static str]) -> Self {
        Self { fetch, ..self }
    }

    pub fn signature(&self) -> MethodSignature {
        MethodSignature {
            entity: self.entity,
            name: self.name,
            params: self.params.iter().map(|param| param.ty).collect(),
            returns: self.returns,
            projection: self.projection.map(|target| target.name),
        }
    }

    /// `Entity.methodName`, the key named queries are registered under.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.entity, self.name)
    }
}

/// Printable identity of a declared method, carried by its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub entity: &'static str,
    pub name: &'static str,
    pub params: Vec<ParamType>,
    pub returns: ReturnShape,
    pub projection: Option<&'static str>,
}

impl Display for MethodSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let params = self
            .params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}.{}({params})", self.entity, self.name)?;
        if let Some(projection) = self.projection {
            write!(f, " as {projection}")?;
        }
        Ok(())
    }
}
