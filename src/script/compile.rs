use super::ast::{Expr, OperationDecl, ROOT_VAR, Statement, Stmt};
use super::parser::parse_script;
use crate::core::{DbError, Gid, Result, Value};
use crate::document::Document;
use crate::schema::Schema;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Callable body of an operation: mutates or reads the document and
/// produces the operation's result.
pub type OperationHandler = Arc<dyn Fn(&mut Document, Vec<Value>) -> Result<Value> + Send + Sync>;

/// Legacy mutation rule: the name starts with `set`, `create`, `update` or
/// `delete`, case-insensitively.
pub fn infer_mutates(operation: &str) -> bool {
    let lower = operation.to_ascii_lowercase();
    ["set", "create", "update", "delete"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Operation run when a whole script is executed.
pub const ENTRY_OPERATION: &str = "main";

/// Legacy whole-script rule: the script path mentions `set`, `create`,
/// `update` or `delete` anywhere, case-insensitively.
pub fn infer_script_mutates(script_id: &str) -> bool {
    let lower = script_id.to_ascii_lowercase();
    ["set", "create", "update", "delete"]
        .iter()
        .any(|word| lower.contains(word))
}

#[derive(Clone)]
pub struct CompiledOperation {
    pub name: String,
    pub params: Vec<String>,
    /// Declared flag, or the name heuristic when the declaration is silent.
    pub mutates: bool,
    pub handler: OperationHandler,
}

impl CompiledOperation {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Debug for CompiledOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledOperation")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("mutates", &self.mutates)
            .finish()
    }
}

/// A compiled script: its operations by exact name.
#[derive(Debug, Clone)]
pub struct Script {
    id: String,
    operations: Vec<Arc<CompiledOperation>>,
    index: HashMap<String, usize>,
}

impl Script {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operations: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Parses and checks `source` against `schema`.
    pub fn compile(id: &str, source: &str, schema: &Schema) -> Result<Self> {
        let decls = parse_script(id, source)?;
        let mut script = Self::new(id);
        for decl in decls {
            check_operation(id, &decl, schema)?;
            if script.index.contains_key(&decl.name) {
                return Err(DbError::script_parse(
                    id,
                    format!("Line {}: operation '{}' is declared twice", decl.line, decl.name),
                ));
            }
            script.insert(compile_operation(id, decl));
        }
        Ok(script)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn insert(&mut self, operation: CompiledOperation) {
        let name = operation.name.clone();
        match self.index.get(&name) {
            Some(&idx) => self.operations[idx] = Arc::new(operation),
            None => {
                self.index.insert(name, self.operations.len());
                self.operations.push(Arc::new(operation));
            }
        }
    }

    pub fn operation(&self, name: &str) -> Option<&Arc<CompiledOperation>> {
        self.index.get(name).map(|idx| &self.operations[*idx])
    }

    pub fn operations(&self) -> impl Iterator<Item = &Arc<CompiledOperation>> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// ============================================================================
// Static checks
// ============================================================================

fn check_operation(script_id: &str, decl: &OperationDecl, schema: &Schema) -> Result<()> {
    let err = |line: usize, msg: String| DbError::script_parse(script_id, format!("Line {}: {}", line, msg));

    let mut scope: HashSet<&str> = HashSet::new();
    scope.insert(ROOT_VAR);
    for param in &decl.params {
        if param == ROOT_VAR {
            return Err(err(decl.line, format!("'{}' is reserved and cannot be a parameter", ROOT_VAR)));
        }
        if !scope.insert(param) {
            return Err(err(decl.line, format!("parameter '{}' is declared twice", param)));
        }
    }

    for Statement { line, stmt } in &decl.body {
        let line = *line;
        let check = |expr: &Expr, scope: &HashSet<&str>| {
            check_expr(expr, scope, schema).map_err(|msg| err(line, msg))
        };
        let check_var = |var: &str, scope: &HashSet<&str>| {
            if scope.contains(var) {
                Ok(())
            } else {
                Err(err(line, format!("variable '${}' is used before it is defined", var)))
            }
        };

        match stmt {
            Stmt::Let { name, value } => {
                check(value, &scope)?;
                if name == ROOT_VAR {
                    return Err(err(line, format!("'{}' cannot be reassigned", ROOT_VAR)));
                }
                scope.insert(name);
            }
            Stmt::Set { var, value, .. }
            | Stmt::Link { var, value, .. }
            | Stmt::Unlink { var, value, .. } => {
                check_var(var, &scope)?;
                check(value, &scope)?;
            }
            Stmt::Delete(value) => check(value, &scope)?,
            Stmt::Require { condition, .. } => check(condition, &scope)?,
            Stmt::Return(value) => {
                if let Some(value) = value {
                    check(value, &scope)?;
                }
            }
        }
    }
    Ok(())
}

fn check_expr(expr: &Expr, scope: &HashSet<&str>, schema: &Schema) -> std::result::Result<(), String> {
    let known_type = |name: &str| {
        if schema.type_def(name).is_some() {
            Ok(())
        } else {
            Err(format!("unknown type '{}'", name))
        }
    };
    let defined = |var: &str| {
        if scope.contains(var) {
            Ok(())
        } else {
            Err(format!("variable '${}' is used before it is defined", var))
        }
    };

    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Var(var) | Expr::Member { var, .. } => defined(var),
        Expr::All(type_name) => known_type(type_name),
        Expr::Find { type_name, gid } => {
            known_type(type_name)?;
            check_expr(gid, scope, schema)
        }
        Expr::Select {
            type_name,
            attribute,
            value,
        } => {
            known_type(type_name)?;
            schema
                .attribute(type_name, attribute)
                .map_err(|e| e.to_string())?;
            check_expr(value, scope, schema)
        }
        Expr::Count(inner) => check_expr(inner, scope, schema),
        Expr::Create {
            type_name,
            parent,
            gid,
            ..
        } => {
            known_type(type_name)?;
            defined(parent)?;
            match gid {
                Some(gid) => check_expr(gid, scope, schema),
                None => Ok(()),
            }
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn compile_operation(script_id: &str, decl: OperationDecl) -> CompiledOperation {
    let mutates = decl.mutates.unwrap_or_else(|| infer_mutates(&decl.name));
    let name = decl.name.clone();
    let params = decl.params.clone();
    let body = Arc::new(OperationBody {
        script_id: script_id.to_string(),
        decl,
    });

    CompiledOperation {
        name,
        params,
        mutates,
        handler: Arc::new(move |document: &mut Document, args: Vec<Value>| body.run(document, args)),
    }
}

struct OperationBody {
    script_id: String,
    decl: OperationDecl,
}

enum Flow {
    Continue,
    Return(Value),
}

impl OperationBody {
    fn run(&self, document: &mut Document, args: Vec<Value>) -> Result<Value> {
        let mut env: HashMap<&str, Value> = HashMap::with_capacity(args.len() + 1);
        env.insert(ROOT_VAR, Value::Node(document.root().clone()));
        for (param, arg) in self.decl.params.iter().zip(args) {
            env.insert(param, arg);
        }

        for statement in &self.decl.body {
            match self
                .exec(statement, document, &mut env)
                .map_err(|e| self.locate(statement.line, e))?
            {
                Flow::Continue => {}
                Flow::Return(value) => return Ok(value),
            }
        }
        Ok(Value::Null)
    }

    /// Prefixes interpreter failures with their position; schema errors pass through.
    fn locate(&self, line: usize, err: DbError) -> DbError {
        match err {
            DbError::Execution(msg) => DbError::Execution(format!(
                "{}::{} line {}: {}",
                self.script_id, self.decl.name, line, msg
            )),
            other => other,
        }
    }

    fn exec<'a>(
        &'a self,
        statement: &'a Statement,
        document: &mut Document,
        env: &mut HashMap<&'a str, Value>,
    ) -> Result<Flow> {
        match &statement.stmt {
            Stmt::Let { name, value } => {
                let value = eval(value, document, env)?;
                env.insert(name, value);
            }
            Stmt::Set {
                var,
                attribute,
                value,
            } => {
                let target = node_var(env, var)?;
                let value = eval(value, document, env)?;
                document.set_attribute(&target, attribute, value)?;
            }
            Stmt::Link {
                var,
                relationship,
                value,
            } => {
                let source = node_var(env, var)?;
                match eval(value, document, env)? {
                    Value::Null => document.clear_reference(&source, relationship)?,
                    value => {
                        for target in node_list(&value)? {
                            document.link(&source, relationship, &target)?;
                        }
                    }
                }
            }
            Stmt::Unlink {
                var,
                relationship,
                value,
            } => {
                let source = node_var(env, var)?;
                let value = eval(value, document, env)?;
                for target in node_list(&value)? {
                    document.unlink(&source, relationship, &target)?;
                }
            }
            Stmt::Delete(value) => {
                let value = eval(value, document, env)?;
                for gid in node_list(&value)? {
                    // An earlier cascade may already have removed it.
                    if document.contains(&gid) {
                        document.delete(&gid)?;
                    }
                }
            }
            Stmt::Require { condition, message } => {
                if !eval(condition, document, env)?.as_bool() {
                    return Err(DbError::Execution(message.clone()));
                }
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => eval(expr, document, env)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Continue)
    }
}

fn eval(expr: &Expr, document: &mut Document, env: &HashMap<&str, Value>) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(var) => lookup(env, var).cloned(),
        Expr::Member { var, member } => {
            let gid = node_var(env, var)?;
            member_value(document, &gid, member)
        }
        Expr::All(type_name) => Ok(Value::Nodes(document.all_of_type(type_name))),
        Expr::Find { type_name, gid } => {
            let gid = match eval(gid, document, env)? {
                Value::Null => return Ok(Value::Null),
                Value::Text(text) => Gid::new(text),
                Value::Node(gid) => gid,
                other => {
                    return Err(DbError::Execution(format!(
                        "find expects a gid, got {}",
                        other.type_name()
                    )));
                }
            };
            Ok(document
                .find(type_name, &gid)
                .map(|node| Value::Node(node.gid().clone()))
                .unwrap_or(Value::Null))
        }
        Expr::Select {
            type_name,
            attribute,
            value,
        } => {
            let wanted = eval(value, document, env)?;
            let mut matches = Vec::new();
            for gid in document.all_of_type(type_name) {
                let actual = document.attribute(&gid, attribute)?;
                if loosely_equal(&actual, &wanted) {
                    matches.push(gid);
                }
            }
            Ok(Value::Nodes(matches))
        }
        Expr::Count(inner) => {
            let count = match eval(inner, document, env)? {
                Value::Null => 0,
                Value::Node(_) => 1,
                Value::Nodes(gids) => gids.len(),
                other => {
                    return Err(DbError::Execution(format!(
                        "count expects nodes, got {}",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Integer(count as i64))
        }
        Expr::Create {
            type_name,
            parent,
            relationship,
            gid,
        } => {
            let parent = node_var(env, parent)?;
            let gid = match gid {
                None => None,
                Some(expr) => match eval(expr, document, env)? {
                    Value::Null => None,
                    Value::Text(text) => Some(Gid::new(text)),
                    other => {
                        return Err(DbError::Execution(format!(
                            "create ... as expects a text gid, got {}",
                            other.type_name()
                        )));
                    }
                },
            };
            let created = document.create_child(&parent, relationship, type_name, gid)?;
            Ok(Value::Node(created))
        }
    }
}

fn lookup<'e>(env: &'e HashMap<&str, Value>, var: &str) -> Result<&'e Value> {
    env.get(var)
        .ok_or_else(|| DbError::Execution(format!("variable '${}' is not defined", var)))
}

fn node_var(env: &HashMap<&str, Value>, var: &str) -> Result<Gid> {
    match lookup(env, var)? {
        Value::Node(gid) => Ok(gid.clone()),
        Value::Null => Err(DbError::Execution(format!("'${}' is null", var))),
        other => Err(DbError::Execution(format!(
            "'${}' is {}, not a node",
            var,
            other.type_name()
        ))),
    }
}

fn node_list(value: &Value) -> Result<Vec<Gid>> {
    value.node_refs().ok_or_else(|| {
        DbError::Execution(format!("expected nodes, got {}", value.type_name()))
    })
}

fn member_value(document: &Document, gid: &Gid, member: &str) -> Result<Value> {
    let node = document.require_node(gid)?;
    if let Ok(value) = node.attribute(member) {
        return Ok(value.clone());
    }
    let rel = node.relationship(member).map_err(|_| DbError::UnknownAttribute {
        type_name: node.type_name().to_string(),
        attribute: member.to_string(),
    })?;
    let targets = document.linked(gid, member)?;
    if rel.many {
        Ok(Value::Nodes(targets))
    } else {
        Ok(targets.into_iter().next().map(Value::Node).unwrap_or(Value::Null))
    }
}

fn loosely_equal(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        (Value::Enum(a) | Value::Text(a), Value::Enum(b) | Value::Text(b)) => a == b,
        (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::schema;

    const SCRIPT: &str = r#"
        operation createCave(gid, name) {
            let cave = create Cave in $root.caves as $gid
            set $cave.name = $name
            return $cave
        }

        operation getAllCaves() {
            return all Cave
        }

        operation cavesNamed(name) readonly {
            return select Cave where name = $name
        }

        operation addDefect(caveGid, severity) mutates {
            let cave = find Cave $caveGid
            require $cave else "cave not found"
            let defect = create Defect in $cave.defects
            set $defect.severity = $severity
            link $defect.seenIn = $cave
            return count $cave.defects
        }

        operation deleteCave(gid) {
            delete find Cave $gid
        }
    "#;

    fn compiled() -> Script {
        Script::compile("caves.ops", SCRIPT, &schema()).unwrap()
    }

    fn call(script: &Script, doc: &mut Document, name: &str, args: Vec<Value>) -> Result<Value> {
        let op = script.operation(name).unwrap();
        (op.handler)(doc, args)
    }

    #[test]
    fn test_mutation_flags() {
        let script = compiled();
        let flag = |name: &str| script.operation(name).unwrap().mutates;
        assert!(flag("createCave"));
        assert!(!flag("getAllCaves"));
        assert!(!flag("cavesNamed"));
        assert!(flag("addDefect"));
        assert!(flag("deleteCave"));
        assert!(infer_mutates("UpdateLabel"));
        assert!(!infer_mutates("resetAll"));
    }

    #[test]
    fn test_operations_run_against_document() {
        let script = compiled();
        let mut doc = Document::new(schema());

        let cave = call(
            &script,
            &mut doc,
            "createCave",
            vec![Value::from("c16"), Value::from("Cave 16")],
        )
        .unwrap();
        assert_eq!(cave, Value::Node(Gid::new("c16")));

        let count = call(
            &script,
            &mut doc,
            "addDefect",
            vec![Value::from("c16"), Value::from("severe")],
        )
        .unwrap();
        assert_eq!(count, Value::Integer(1));

        let named = call(&script, &mut doc, "cavesNamed", vec![Value::from("Cave 16")]).unwrap();
        assert_eq!(named, Value::Nodes(vec![Gid::new("c16")]));

        call(&script, &mut doc, "deleteCave", vec![Value::from("c16")]).unwrap();
        assert_eq!(
            call(&script, &mut doc, "getAllCaves", vec![]).unwrap(),
            Value::Nodes(vec![])
        );
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_require_failure_is_execution_error() {
        let script = compiled();
        let mut doc = Document::new(schema());
        let err = call(
            &script,
            &mut doc,
            "addDefect",
            vec![Value::from("missing"), Value::from("minor")],
        )
        .unwrap_err();
        match err {
            DbError::Execution(msg) => {
                assert!(msg.contains("caves.ops::addDefect line 18"), "{}", msg);
                assert!(msg.ends_with("cave not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_static_checks() {
        let schema = schema();
        let unknown_type = "operation f() {\n  return all Pagoda\n}\n";
        let undefined = "operation f() {\n  set $cave.name = \"x\"\n}\n";
        let duplicate_param = "operation f(a, a) {\n}\n";
        let duplicate_op = "operation f() {\n}\noperation f() {\n}\n";
        let bad_select = "operation f() {\n  return select Cave where colour = 1\n}\n";

        for (source, line) in [
            (unknown_type, "Line 2:"),
            (undefined, "Line 2:"),
            (duplicate_param, "Line 1:"),
            (duplicate_op, "Line 3:"),
            (bad_select, "Line 2:"),
        ] {
            match Script::compile("s.ops", source, &schema).unwrap_err() {
                DbError::ScriptParse { message, .. } => {
                    assert!(message.starts_with(line), "{}: {}", source, message)
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }
}
