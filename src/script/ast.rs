use crate::core::Value;

/// Name under which the document root is always bound.
pub const ROOT_VAR: &str = "root";

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `$name`
    Var(String),
    /// `$name.member`, an attribute or a relationship
    Member { var: String, member: String },
    /// `all Type`
    All(String),
    /// `find Type <expr>`
    Find { type_name: String, gid: Box<Expr> },
    /// `select Type where attr = <expr>`
    Select {
        type_name: String,
        attribute: String,
        value: Box<Expr>,
    },
    /// `count <expr>`
    Count(Box<Expr>),
    /// `create Type in $var.rel [as <expr>]`
    Create {
        type_name: String,
        parent: String,
        relationship: String,
        gid: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { name: String, value: Expr },
    Set { var: String, attribute: String, value: Expr },
    Link { var: String, relationship: String, value: Expr },
    Unlink { var: String, relationship: String, value: Expr },
    Delete(Expr),
    Require { condition: Expr, message: String },
    Return(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub stmt: Stmt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDecl {
    pub name: String,
    pub params: Vec<String>,
    /// `mutates` / `readonly` marker, when the header carries one.
    pub mutates: Option<bool>,
    pub line: usize,
    pub body: Vec<Statement>,
}
