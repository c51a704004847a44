use std::path::PathBuf;

use carve_core::NodeKind;
use tree_sitter::{Node, Tree};

/// One parsed `.java` file, kept alive between the declaration pass and the
/// reference pass.
pub struct ParsedUnit {
    pub path: PathBuf,
    pub source: String,
    pub tree: Tree,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Imports {
    pub single: Vec<String>,
    pub on_demand: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOutline {
    pub name: String,
    pub type_name: Option<String>,
}

/// A member type declaration: top level or nested in another type's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeOutline {
    pub fqn: String,
    pub kind: NodeKind,
    pub start_byte: usize,
    /// Enclosing declarations, outermost first, not including this one.
    pub enclosing: Vec<String>,
    pub superclass: Option<String>,
    pub fields: Vec<FieldOutline>,
    pub type_params: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOutline {
    pub package: String,
    pub imports: Imports,
    pub types: Vec<TypeOutline>,
}

pub fn outline_unit(unit: &ParsedUnit) -> UnitOutline {
    let source = unit.source.as_bytes();
    let root = unit.tree.root_node();
    let mut outline = UnitOutline::default();

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "package_declaration" => {
                if let Some(name) = qualified_name_child(child, source) {
                    outline.package = name;
                }
            }
            "import_declaration" => record_import(child, source, &mut outline.imports),
            _ => {}
        }
    }

    collect_member_types(root, source, &outline.package, &[], &mut outline.types);
    outline
}

pub fn declaration_kind(kind: &str) -> Option<NodeKind> {
    match kind {
        "class_declaration" => Some(NodeKind::Class),
        "interface_declaration" => Some(NodeKind::Interface),
        "enum_declaration" => Some(NodeKind::Enum),
        "record_declaration" => Some(NodeKind::Record),
        "annotation_type_declaration" => Some(NodeKind::Annotation),
        _ => None,
    }
}

pub fn text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

/// Name of the type a type node denotes, without type arguments or array
/// dimensions. Primitive and `void` types have none.
pub fn base_type_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "type_identifier" | "scoped_type_identifier" => {
            let name = text(node, source)
                .chars()
                .filter(|ch| !ch.is_whitespace())
                .collect::<String>();
            (!name.is_empty()).then_some(name)
        }
        "generic_type" => {
            let mut cursor = node.walk();
            let inner = node
                .named_children(&mut cursor)
                .find(|child| matches!(child.kind(), "type_identifier" | "scoped_type_identifier"));
            inner.and_then(|inner| base_type_name(inner, source))
        }
        "array_type" => node
            .child_by_field_name("element")
            .and_then(|element| base_type_name(element, source)),
        "annotated_type" => {
            let count = node.named_child_count();
            (count > 0)
                .then(|| node.named_child(count - 1))
                .flatten()
                .and_then(|inner| base_type_name(inner, source))
        }
        _ => None,
    }
}

fn qualified_name_child(node: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    let name = node
        .named_children(&mut cursor)
        .find(|child| matches!(child.kind(), "scoped_identifier" | "identifier"))?;
    let name = text(name, source)
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>();
    (!name.is_empty()).then_some(name)
}

fn record_import(node: Node<'_>, source: &[u8], imports: &mut Imports) {
    let mut cursor = node.walk();
    let mut is_static = false;
    let mut on_demand = false;
    for child in node.children(&mut cursor) {
        match child.kind() {
            "static" => is_static = true,
            "asterisk" => on_demand = true,
            _ => {}
        }
    }
    // Static imports bring in members, not types.
    if is_static {
        return;
    }
    let Some(name) = qualified_name_child(node, source) else {
        return;
    };
    if on_demand {
        imports.on_demand.push(name);
    } else {
        imports.single.push(name);
    }
}

fn collect_member_types(
    container: Node<'_>,
    source: &[u8],
    package: &str,
    enclosing: &[String],
    out: &mut Vec<TypeOutline>,
) {
    let mut cursor = container.walk();
    for child in container.named_children(&mut cursor) {
        if child.kind() == "enum_body_declarations" {
            collect_member_types(child, source, package, enclosing, out);
            continue;
        }
        let Some(kind) = declaration_kind(child.kind()) else {
            continue;
        };
        let Some(name) = child
            .child_by_field_name("name")
            .map(|name| text(name, source).trim().to_owned())
            .filter(|name| !name.is_empty())
        else {
            continue;
        };

        let fqn = match enclosing.last() {
            Some(parent) => format!("{parent}.{name}"),
            None if package.is_empty() => name,
            None => format!("{package}.{name}"),
        };

        let body = child.child_by_field_name("body");
        let mut fields = body
            .map(|body| collect_fields(body, source))
            .unwrap_or_default();
        if kind == NodeKind::Record {
            fields.extend(record_components(child, source));
        }

        out.push(TypeOutline {
            fqn: fqn.clone(),
            kind,
            start_byte: child.start_byte(),
            enclosing: enclosing.to_vec(),
            superclass: child
                .child_by_field_name("superclass")
                .and_then(|superclass| superclass.named_child(0))
                .and_then(|ty| base_type_name(ty, source)),
            fields,
            type_params: type_parameter_names(child, source),
        });

        if let Some(body) = body {
            let mut nested = enclosing.to_vec();
            nested.push(fqn);
            collect_member_types(body, source, package, &nested, out);
        }
    }
}

fn collect_fields(body: Node<'_>, source: &[u8]) -> Vec<FieldOutline> {
    let mut fields = Vec::new();
    let mut cursor = body.walk();
    let mut members = body.named_children(&mut cursor).collect::<Vec<_>>();
    if body.kind() == "enum_body" {
        // Enum constants are fields of the enum itself.
        let type_name = body
            .parent()
            .and_then(|decl| decl.child_by_field_name("name"))
            .map(|name| text(name, source).trim().to_owned());
        for constant in members.iter().filter(|member| member.kind() == "enum_constant") {
            if let Some(name) = constant.child_by_field_name("name") {
                fields.push(FieldOutline {
                    name: text(name, source).to_owned(),
                    type_name: type_name.clone(),
                });
            }
        }
        let mut inner = body.walk();
        members = body
            .named_children(&mut inner)
            .filter(|member| member.kind() == "enum_body_declarations")
            .flat_map(|declarations| {
                let mut cursor = declarations.walk();
                declarations.named_children(&mut cursor).collect::<Vec<_>>()
            })
            .collect();
    }

    for member in members {
        if !matches!(member.kind(), "field_declaration" | "constant_declaration") {
            continue;
        }
        let type_name = member
            .child_by_field_name("type")
            .and_then(|ty| base_type_name(ty, source));
        let mut cursor = member.walk();
        for declarator in member.children_by_field_name("declarator", &mut cursor) {
            if let Some(name) = declarator.child_by_field_name("name") {
                fields.push(FieldOutline {
                    name: text(name, source).to_owned(),
                    type_name: type_name.clone(),
                });
            }
        }
    }

    fields
}

fn record_components(record: Node<'_>, source: &[u8]) -> Vec<FieldOutline> {
    let Some(parameters) = record.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = parameters.walk();
    parameters
        .named_children(&mut cursor)
        .filter(|parameter| parameter.kind() == "formal_parameter")
        .filter_map(|parameter| {
            let name = parameter.child_by_field_name("name")?;
            Some(FieldOutline {
                name: text(name, source).to_owned(),
                type_name: parameter
                    .child_by_field_name("type")
                    .and_then(|ty| base_type_name(ty, source)),
            })
        })
        .collect()
}

pub fn type_parameter_names(node: Node<'_>, source: &[u8]) -> Vec<String> {
    let Some(parameters) = node.child_by_field_name("type_parameters") else {
        return Vec::new();
    };
    let mut cursor = parameters.walk();
    parameters
        .named_children(&mut cursor)
        .filter(|parameter| parameter.kind() == "type_parameter")
        .filter_map(|parameter| {
            let mut inner = parameter.walk();
            parameter
                .named_children(&mut inner)
                .find(|child| matches!(child.kind(), "type_identifier" | "identifier"))
                .map(|name| text(name, source).to_owned())
        })
        .collect()
}
