use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use carve_core::{DeclaredType, NodeKind, simple_name};

use super::outline::{Imports, UnitOutline};

/// Name-resolution context of one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct UnitScope {
    package: String,
    single: HashMap<String, BTreeSet<String>>,
    on_demand: Vec<String>,
}

impl UnitScope {
    pub fn new(package: &str, imports: &Imports) -> Self {
        let mut single = HashMap::<String, BTreeSet<String>>::new();
        for import in &imports.single {
            single
                .entry(simple_name(import).to_owned())
                .or_default()
                .insert(import.clone());
        }
        Self {
            package: package.to_owned(),
            single,
            on_demand: imports.on_demand.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct TypeInfo {
    kind: NodeKind,
    superclass: Option<String>,
    fields: HashMap<String, Option<String>>,
}

/// Every type declared in the project, with superclass and field types
/// resolved against the declaring unit.
#[derive(Debug, Clone, Default)]
pub struct TypeIndex {
    types: BTreeMap<String, TypeInfo>,
}

impl TypeIndex {
    pub fn build(units: &[UnitOutline]) -> Self {
        let mut index = Self::default();
        for unit in units {
            for declared in &unit.types {
                index.types.entry(declared.fqn.clone()).or_insert(TypeInfo {
                    kind: declared.kind,
                    superclass: None,
                    fields: HashMap::new(),
                });
            }
        }

        let mut resolved = Vec::new();
        for unit in units {
            let scope = UnitScope::new(&unit.package, &unit.imports);
            for declared in &unit.types {
                let mut chain = declared.enclosing.clone();
                chain.push(declared.fqn.clone());
                let superclass = declared
                    .superclass
                    .as_deref()
                    .and_then(|name| index.resolve(name, &scope, &chain));
                let fields = declared
                    .fields
                    .iter()
                    .map(|field| {
                        let type_fqn = field
                            .type_name
                            .as_deref()
                            .filter(|name| !declared.type_params.iter().any(|param| param == *name))
                            .and_then(|name| index.resolve(name, &scope, &chain));
                        (field.name.clone(), type_fqn)
                    })
                    .collect::<HashMap<_, _>>();
                resolved.push((declared.fqn.clone(), superclass, fields));
            }
        }

        for (fqn, superclass, fields) in resolved {
            if let Some(info) = index.types.get_mut(&fqn) {
                if info.superclass.is_none() {
                    info.superclass = superclass.filter(|parent| *parent != fqn);
                }
                info.fields.extend(fields);
            }
        }

        index
    }

    pub fn contains(&self, fqn: &str) -> bool {
        self.types.contains_key(fqn)
    }

    pub fn declared_types(&self) -> Vec<DeclaredType> {
        self.types
            .iter()
            .map(|(fqn, info)| DeclaredType {
                fqn: fqn.clone(),
                kind: info.kind,
            })
            .collect()
    }

    pub fn superclass(&self, fqn: &str) -> Option<&str> {
        self.types.get(fqn)?.superclass.as_deref()
    }

    /// Declared type of `field` on `owner`, walking project superclasses.
    /// Returns `None` when the field is unknown; `Some(None)` when it exists
    /// but its type is outside the project.
    pub fn field_type(&self, owner: &str, field: &str) -> Option<Option<&str>> {
        let mut visited = HashSet::new();
        let mut current = Some(owner);
        while let Some(fqn) = current {
            if !visited.insert(fqn) {
                break;
            }
            let info = self.types.get(fqn)?;
            if let Some(type_fqn) = info.fields.get(field) {
                return Some(type_fqn.as_deref());
            }
            current = info.superclass.as_deref();
        }
        None
    }

    /// Resolves a type name as written in source. `chain` lists the enclosing
    /// declarations, outermost first. Ambiguous or unknown names give `None`.
    pub fn resolve(&self, name: &str, scope: &UnitScope, chain: &[String]) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        match name.split_once('.') {
            None => self.resolve_simple(name, scope, chain),
            Some((head, rest)) => {
                if let Some(base) = self.resolve_simple(head, scope, chain) {
                    let candidate = format!("{base}.{rest}");
                    if self.contains(&candidate) {
                        return Some(candidate);
                    }
                }
                self.contains(name).then(|| name.to_owned())
            }
        }
    }

    fn resolve_simple(&self, name: &str, scope: &UnitScope, chain: &[String]) -> Option<String> {
        for enclosing in chain.iter().rev() {
            if simple_name(enclosing) == name {
                return Some(enclosing.clone());
            }
            let nested = format!("{enclosing}.{name}");
            if self.contains(&nested) {
                return Some(nested);
            }
        }

        if let Some(imported) = scope.single.get(name) {
            // A single-type import shadows the package even when it points
            // outside the project.
            if imported.len() != 1 {
                return None;
            }
            return imported
                .first()
                .filter(|fqn| self.contains(fqn))
                .cloned();
        }

        let same_package = if scope.package.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{name}", scope.package)
        };
        if self.contains(&same_package) {
            return Some(same_package);
        }

        let mut matches = scope
            .on_demand
            .iter()
            .map(|prefix| format!("{prefix}.{name}"))
            .filter(|candidate| self.contains(candidate))
            .collect::<BTreeSet<_>>();
        if matches.len() == 1 {
            return matches.pop_first();
        }
        None
    }
}
