use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use carve_core::{DependencyBreakdown, RawEdge, ReferenceKind};
use thiserror::Error;
use tree_sitter::Node;

use super::outline::{
    ParsedUnit, TypeOutline, UnitOutline, base_type_name, declaration_kind, text,
    type_parameter_names,
};
use super::resolve::{TypeIndex, UnitScope};

/// One resolved reference from a declaration body to a project type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEvent {
    pub source_fqn: String,
    pub target_fqn: String,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VisitError {
    #[error("syntax error at line {line}")]
    Syntax { line: usize },
    #[error("declaration node not found at byte {0}")]
    MissingDeclaration(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationFailure {
    pub fqn: String,
    pub error: VisitError,
}

#[derive(Debug, Clone, Default)]
pub struct UnitEvents {
    pub events: Vec<ReferenceEvent>,
    pub failures: Vec<DeclarationFailure>,
    /// Type names seen in type positions that did not resolve to a project type.
    pub unresolved: BTreeSet<String>,
}

/// Walks every member declaration of `unit` and reports its references. A
/// declaration that fails to visit contributes no events and is listed in
/// `failures`; the others are unaffected.
pub fn collect_reference_events(
    unit: &ParsedUnit,
    outline: &UnitOutline,
    index: &TypeIndex,
) -> UnitEvents {
    let source = unit.source.as_bytes();
    let scope = UnitScope::new(&outline.package, &outline.imports);
    let member_starts = outline
        .types
        .iter()
        .map(|declared| declared.start_byte)
        .collect::<HashSet<_>>();
    let nodes = declaration_nodes(unit.tree.root_node(), &member_starts);

    let mut collected = UnitEvents::default();
    for declared in &outline.types {
        let result = match nodes.get(&declared.start_byte) {
            Some(node) => {
                let mut visitor = Visitor::new(source, index, &scope, declared, &member_starts);
                visitor
                    .visit_declaration(*node)
                    .map(|()| (visitor.events, visitor.unresolved))
            }
            None => Err(VisitError::MissingDeclaration(declared.start_byte)),
        };

        match result {
            Ok((events, unresolved)) => {
                collected.events.extend(events);
                collected.unresolved.extend(unresolved);
            }
            Err(error) => collected.failures.push(DeclarationFailure {
                fqn: declared.fqn.clone(),
                error,
            }),
        }
    }

    collected
}

/// Folds events into one edge per (source, target) pair. Self references are
/// dropped and the weight is the sum of the per-kind counts.
pub fn reduce_events(events: &[ReferenceEvent]) -> Vec<RawEdge> {
    let mut pairs = BTreeMap::<(&str, &str), DependencyBreakdown>::new();
    for event in events {
        if event.source_fqn == event.target_fqn {
            continue;
        }
        pairs
            .entry((event.source_fqn.as_str(), event.target_fqn.as_str()))
            .or_default()
            .record(event.kind);
    }

    pairs
        .into_iter()
        .map(|((source, target), breakdown)| RawEdge::with_breakdown(source, target, breakdown))
        .collect()
}

fn declaration_nodes<'tree>(
    root: Node<'tree>,
    starts: &HashSet<usize>,
) -> HashMap<usize, Node<'tree>> {
    let mut found = HashMap::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if declaration_kind(node.kind()).is_some() && starts.contains(&node.start_byte()) {
            found.insert(node.start_byte(), node);
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    found
}

/// Line of the first error or missing node inside `declaration`, ignoring
/// nested member types.
fn first_syntax_error(declaration: Node<'_>, member_starts: &HashSet<usize>) -> Option<usize> {
    if !declaration.has_error() {
        return None;
    }
    let mut stack = vec![declaration];
    let mut lines = Vec::new();
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            lines.push(node.start_position().row + 1);
            continue;
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        stack.extend(node.children(&mut cursor).filter(|child| {
            declaration_kind(child.kind()).is_none() || !member_starts.contains(&child.start_byte())
        }));
    }
    lines.into_iter().min()
}

struct Visitor<'a> {
    source: &'a [u8],
    index: &'a TypeIndex,
    scope: &'a UnitScope,
    owner: &'a str,
    chain: Vec<String>,
    member_starts: &'a HashSet<usize>,
    type_params: Vec<String>,
    locals: Vec<HashMap<String, Option<String>>>,
    events: Vec<ReferenceEvent>,
    unresolved: BTreeSet<String>,
}

impl<'a> Visitor<'a> {
    fn new(
        source: &'a [u8],
        index: &'a TypeIndex,
        scope: &'a UnitScope,
        declared: &'a TypeOutline,
        member_starts: &'a HashSet<usize>,
    ) -> Self {
        let mut chain = declared.enclosing.clone();
        chain.push(declared.fqn.clone());
        Self {
            source,
            index,
            scope,
            owner: &declared.fqn,
            chain,
            member_starts,
            type_params: declared.type_params.clone(),
            locals: vec![HashMap::new()],
            events: Vec::new(),
            unresolved: BTreeSet::new(),
        }
    }

    fn visit_declaration(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        if let Some(line) = first_syntax_error(node, self.member_starts) {
            return Err(VisitError::Syntax { line });
        }
        self.walk_children(node)
    }

    fn walk_children(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child)?;
        }
        Ok(())
    }

    fn walk_field(&mut self, node: Node<'_>, field: &str) -> Result<(), VisitError> {
        match node.child_by_field_name(field) {
            Some(child) => self.walk(child),
            None => Ok(()),
        }
    }

    fn walk(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        if node.is_error() || node.is_missing() {
            return Err(VisitError::Syntax {
                line: node.start_position().row + 1,
            });
        }

        let kind = node.kind();
        if declaration_kind(kind).is_some() && self.member_starts.contains(&node.start_byte()) {
            // Member types are visited as declarations of their own.
            return Ok(());
        }

        match kind {
            "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => {
                let params = type_parameter_names(node, self.source);
                let restore = self.type_params.len();
                self.type_params.extend(params);
                self.locals.push(HashMap::new());
                let result = self.walk_children(node);
                self.locals.pop();
                self.type_params.truncate(restore);
                result
            }
            "static_initializer" => {
                self.locals.push(HashMap::new());
                let result = self.walk_children(node);
                self.locals.pop();
                result
            }
            "lambda_expression" => self.visit_lambda(node),
            "formal_parameter" => {
                let declared = self.declared_type(node.child_by_field_name("type"))?;
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, declared);
                }
                Ok(())
            }
            "catch_clause" => {
                self.locals.push(HashMap::new());
                let result = self.walk_children(node);
                self.locals.pop();
                result
            }
            "catch_formal_parameter" => self.visit_catch_parameter(node),
            "local_variable_declaration" | "field_declaration" | "constant_declaration" => {
                self.visit_variables(node, kind == "local_variable_declaration")
            }
            "resource" => {
                if node.child_by_field_name("type").is_none() {
                    return self.walk_children(node);
                }
                let declared = self.declared_type(node.child_by_field_name("type"))?;
                self.walk_field(node, "value")?;
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, declared);
                }
                Ok(())
            }
            "enhanced_for_statement" => {
                let declared = self.declared_type(node.child_by_field_name("type"))?;
                self.walk_field(node, "value")?;
                self.locals.push(HashMap::new());
                if let Some(name) = node.child_by_field_name("name") {
                    self.declare(name, declared);
                }
                let result = self.walk_field(node, "body");
                self.locals.pop();
                result
            }
            "method_invocation" => self.visit_invocation(node),
            "method_reference" => {
                if let Some(receiver) = node.named_child(0)
                    && let Some(target) = self.receiver_type(receiver)
                {
                    self.emit(ReferenceKind::MethodCall, target);
                }
                Ok(())
            }
            "field_access" => self.visit_field_access(node),
            "object_creation_expression" => self.visit_creation(node),
            "marker_annotation" | "annotation" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = text(name, self.source).to_owned();
                    if let Some(target) = self.resolve_logged(&name) {
                        self.emit(ReferenceKind::TypeReference, target);
                    }
                }
                self.walk_field(node, "arguments")
            }
            "type_identifier" | "scoped_type_identifier" | "generic_type" | "array_type"
            | "annotated_type" => self.visit_type(node),
            _ => self.walk_children(node),
        }
    }

    fn visit_lambda(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        self.locals.push(HashMap::new());
        let result = self.visit_lambda_scope(node);
        self.locals.pop();
        result
    }

    fn visit_lambda_scope(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        if let Some(parameters) = node.child_by_field_name("parameters") {
            match parameters.kind() {
                "identifier" => self.declare(parameters, None),
                "inferred_parameters" => {
                    let mut cursor = parameters.walk();
                    let names = parameters.named_children(&mut cursor).collect::<Vec<_>>();
                    for name in names {
                        self.declare(name, None);
                    }
                }
                _ => self.walk(parameters)?,
            }
        }
        self.walk_field(node, "body")
    }

    fn visit_variables(&mut self, node: Node<'_>, local: bool) -> Result<(), VisitError> {
        let mut cursor = node.walk();
        let modifiers = node
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "modifiers")
            .collect::<Vec<_>>();
        for modifiers in modifiers {
            self.walk(modifiers)?;
        }

        let type_node = node.child_by_field_name("type");
        let mut declared = self.declared_type(type_node)?;

        let declarators = node
            .children_by_field_name("declarator", &mut cursor)
            .collect::<Vec<_>>();
        for declarator in declarators {
            let value = declarator.child_by_field_name("value");
            if let Some(value) = value {
                self.walk(value)?;
            }
            if !local {
                continue;
            }
            let is_var = type_node.is_some_and(|ty| text(ty, self.source) == "var");
            if is_var {
                declared = value
                    .filter(|value| value.kind() == "object_creation_expression")
                    .and_then(|value| self.receiver_type(value));
            }
            if let Some(name) = declarator.child_by_field_name("name") {
                self.declare(name, declared.clone());
            }
        }
        Ok(())
    }

    fn visit_catch_parameter(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        let mut cursor = node.walk();
        let children = node
            .named_children(&mut cursor)
            .filter(|child| matches!(child.kind(), "modifiers" | "catch_type"))
            .collect::<Vec<_>>();
        let mut declared = None;
        for child in children {
            if child.kind() != "catch_type" {
                self.walk(child)?;
                continue;
            }
            let mut cursor = child.walk();
            let alternatives = child.named_children(&mut cursor).collect::<Vec<_>>();
            // A multi-catch variable has no single static type.
            if let [only] = alternatives.as_slice() {
                declared = self.declared_type(Some(*only))?;
            } else {
                for alternative in alternatives {
                    self.walk(alternative)?;
                }
            }
        }
        if let Some(name) = node.child_by_field_name("name") {
            self.declare(name, declared);
        }
        Ok(())
    }

    fn visit_invocation(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        if let Some(object) = node.child_by_field_name("object") {
            if let Some(target) = self.receiver_type(object) {
                self.emit(ReferenceKind::MethodCall, target);
            }
            self.walk(object)?;
        }
        self.walk_field(node, "type_arguments")?;
        self.walk_field(node, "arguments")
    }

    fn visit_field_access(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        // `Outer.Inner` or `com.acme.Type` used as a qualifier.
        if self.quiet_type(text(node, self.source)).is_some() {
            return Ok(());
        }
        let Some(object) = node.child_by_field_name("object") else {
            return self.walk_children(node);
        };
        if let Some(target) = self.receiver_type(object) {
            self.emit(ReferenceKind::FieldAccess, target);
        }
        self.walk(object)
    }

    fn visit_creation(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        if let Some(type_node) = node.child_by_field_name("type") {
            if let Some(name) = base_type_name(type_node, self.source)
                && let Some(target) = self.resolve_logged(&name)
            {
                self.emit(ReferenceKind::ObjectCreation, target);
            }
            if type_node.kind() == "generic_type" {
                let mut cursor = type_node.walk();
                let arguments = type_node
                    .named_children(&mut cursor)
                    .filter(|child| child.kind() == "type_arguments")
                    .collect::<Vec<_>>();
                for arguments in arguments {
                    self.walk(arguments)?;
                }
            }
        }
        self.walk_field(node, "arguments")?;
        let mut cursor = node.walk();
        let bodies = node
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "class_body")
            .collect::<Vec<_>>();
        for body in bodies {
            self.walk(body)?;
        }
        Ok(())
    }

    fn visit_type(&mut self, node: Node<'_>) -> Result<(), VisitError> {
        match node.kind() {
            "array_type" => self.walk_field(node, "element"),
            "annotated_type" => self.walk_children(node),
            "generic_type" => {
                let mut cursor = node.walk();
                let children = node.named_children(&mut cursor).collect::<Vec<_>>();
                for child in children {
                    match child.kind() {
                        "type_identifier" | "scoped_type_identifier" => self.visit_type(child)?,
                        _ => self.walk(child)?,
                    }
                }
                Ok(())
            }
            _ => {
                if let Some(name) = base_type_name(node, self.source)
                    && let Some(target) = self.resolve_logged(&name)
                {
                    self.emit(ReferenceKind::TypeReference, target);
                }
                Ok(())
            }
        }
    }

    /// Emits the type references of a declared type and returns the project
    /// type a variable of that type holds, if any.
    fn declared_type(
        &mut self,
        type_node: Option<Node<'_>>,
    ) -> Result<Option<String>, VisitError> {
        let Some(type_node) = type_node else {
            return Ok(None);
        };
        self.walk(type_node)?;
        Ok(base_type_name(type_node, self.source).and_then(|name| self.quiet_type(&name)))
    }

    /// Static type of a receiver expression, when it is a project type.
    fn receiver_type(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            "this" => Some(self.owner.to_owned()),
            "super" => self.index.superclass(self.owner).map(str::to_owned),
            "identifier" => {
                let name = text(node, self.source);
                match self.variable_type(name) {
                    Some(declared) => declared,
                    None => self.quiet_type(name),
                }
            }
            "field_access" => {
                let object = node.child_by_field_name("object")?;
                let field = node.child_by_field_name("field")?;
                if let Some(owner) = self.receiver_type(object)
                    && let Some(declared) = self.index.field_type(&owner, text(field, self.source))
                {
                    return declared.map(str::to_owned);
                }
                self.quiet_type(text(node, self.source))
            }
            "object_creation_expression" | "cast_expression" => node
                .child_by_field_name("type")
                .and_then(|ty| base_type_name(ty, self.source))
                .and_then(|name| self.quiet_type(&name)),
            "type_identifier" | "scoped_type_identifier" | "generic_type" => {
                base_type_name(node, self.source).and_then(|name| self.quiet_type(&name))
            }
            "parenthesized_expression" => node
                .named_child(0)
                .and_then(|inner| self.receiver_type(inner)),
            _ => None,
        }
    }

    /// `Some(type)` when `name` is a local, parameter or (possibly inherited)
    /// field in scope; the inner value is `None` for non-project types.
    fn variable_type(&self, name: &str) -> Option<Option<String>> {
        for scope in self.locals.iter().rev() {
            if let Some(declared) = scope.get(name) {
                return Some(declared.clone());
            }
        }
        for enclosing in self.chain.iter().rev() {
            if let Some(declared) = self.index.field_type(enclosing, name) {
                return Some(declared.map(str::to_owned));
            }
        }
        None
    }

    fn quiet_type(&self, name: &str) -> Option<String> {
        let name = name
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>();
        let head = name.split('.').next().unwrap_or_default();
        if head == "var" || self.type_params.iter().any(|param| param == head) {
            return None;
        }
        self.index.resolve(&name, self.scope, &self.chain)
    }

    fn resolve_logged(&mut self, name: &str) -> Option<String> {
        let resolved = self.quiet_type(name);
        if resolved.is_none() && name != "var" && !self.type_params.iter().any(|param| param == name)
        {
            self.unresolved.insert(name.to_owned());
        }
        resolved
    }

    fn declare(&mut self, name: Node<'_>, declared: Option<String>) {
        let name = text(name, self.source).to_owned();
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name, declared);
        }
    }

    fn emit(&mut self, kind: ReferenceKind, target_fqn: String) {
        self.events.push(ReferenceEvent {
            source_fqn: self.owner.to_owned(),
            target_fqn,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source: &str, target: &str, kind: ReferenceKind) -> ReferenceEvent {
        ReferenceEvent {
            source_fqn: source.to_owned(),
            target_fqn: target.to_owned(),
            kind,
        }
    }

    #[test]
    fn reduce_events_accumulates_kinds_into_one_edge() {
        let edges = reduce_events(&[
            event("app.A", "app.B", ReferenceKind::FieldAccess),
            event("app.A", "app.B", ReferenceKind::MethodCall),
            event("app.A", "app.A", ReferenceKind::MethodCall),
            event("app.A", "app.B", ReferenceKind::MethodCall),
        ]);

        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!((edge.source_fqn.as_str(), edge.target_fqn.as_str()), ("app.A", "app.B"));
        assert_eq!(edge.weight, 3);
        let breakdown = edge.breakdown.expect("breakdown");
        assert_eq!(breakdown.method_calls, 2);
        assert_eq!(breakdown.field_accesses, 1);
        assert_eq!(breakdown.object_creations, 0);
    }

    #[test]
    fn reduce_events_drops_self_references() {
        let edges = reduce_events(&[event("app.A", "app.A", ReferenceKind::TypeReference)]);
        assert!(edges.is_empty());
    }
}
