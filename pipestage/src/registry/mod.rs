//! Operation registry.
//!
//! Maps operation names to functions for each category (load, transform,
//! validate, write). A [`Registry`] is an ordered list of layers: the
//! builtins first, then every extra module named by the stage, later layers
//! overriding earlier ones by name.
//!
//! Modules that can be layered or imported with `id: custom` live in a
//! [`ModuleCatalog`], keyed by dotted path (`my_project.features`). Programs
//! embedding this library register their own modules there.
//!
//! # Resolution order
//!
//! 1. `custom` resolves `import_from = "<module>.<symbol>"` in the catalog
//! 2. the topmost layer exporting the name
//! 3. a native table method or predicate of that name
//! 4. otherwise [`RegistryError::OperationNotFound`]

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{DataError, DataResult, RegistryError, RegistryResult};
use crate::models::{Container, Kwargs, Signal, Table};

/// Operation id that resolves through `import_from`.
pub const CUSTOM: &str = "custom";

/// Reads one file into a table.
pub type LoadFn = Arc<dyn Fn(&Path, &Kwargs) -> DataResult<Table> + Send + Sync>;

/// Transforms one table; `None` is the tracing placeholder.
pub type TransformFn = Arc<dyn Fn(Option<Table>, &Kwargs) -> DataResult<Container> + Send + Sync>;

/// Computes a validation signal for one table.
pub type ValidateFn = Arc<dyn Fn(&Table, &Kwargs) -> DataResult<Signal> + Send + Sync>;

/// Writes one table to a path.
pub type WriteFn = Arc<dyn Fn(&Table, &Path, &Kwargs) -> DataResult<()> + Send + Sync>;

// =============================================================================
// Module exports
// =============================================================================

/// Named functions exported by one module, per category.
#[derive(Clone, Default)]
pub struct ModuleExports {
    pub load_functions: BTreeMap<String, LoadFn>,
    pub transformation_functions: BTreeMap<String, TransformFn>,
    pub validation_functions: BTreeMap<String, ValidateFn>,
    pub write_functions: BTreeMap<String, WriteFn>,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&Path, &Kwargs) -> DataResult<Table> + Send + Sync + 'static,
    {
        self.load_functions.insert(name.to_string(), Arc::new(func));
        self
    }

    pub fn with_transformation<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(Option<Table>, &Kwargs) -> DataResult<Container> + Send + Sync + 'static,
    {
        self.transformation_functions
            .insert(name.to_string(), Arc::new(func));
        self
    }

    pub fn with_validation<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&Table, &Kwargs) -> DataResult<Signal> + Send + Sync + 'static,
    {
        self.validation_functions
            .insert(name.to_string(), Arc::new(func));
        self
    }

    pub fn with_writer<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&Table, &Path, &Kwargs) -> DataResult<()> + Send + Sync + 'static,
    {
        self.write_functions.insert(name.to_string(), Arc::new(func));
        self
    }
}

impl fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleExports")
            .field("load", &self.load_functions.keys().collect::<Vec<_>>())
            .field("transform", &self.transformation_functions.keys().collect::<Vec<_>>())
            .field("validate", &self.validation_functions.keys().collect::<Vec<_>>())
            .field("write", &self.write_functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Importable modules by dotted path.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, ModuleExports>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, path: &str, exports: ModuleExports) -> Self {
        self.modules.insert(path.to_string(), exports);
        self
    }

    pub fn get(&self, path: &str) -> RegistryResult<&ModuleExports> {
        self.modules
            .get(path)
            .ok_or_else(|| RegistryError::ModuleNotFound(path.to_string()))
    }
}

// =============================================================================
// Operation kinds
// =============================================================================

/// One category of operation.
pub trait OperationKind {
    type Func: Clone;

    /// Human-readable category name.
    const NAME: &'static str;

    fn table(exports: &ModuleExports) -> &BTreeMap<String, Self::Func>;

    /// Whether tables answer to this name natively.
    fn is_native(_id: &str) -> bool {
        false
    }
}

/// `load.format`
pub struct Load;
/// `transformations[].id`
pub struct Transform;
/// `validations[].id`
pub struct Validate;
/// `write.format`
pub struct Write;

impl OperationKind for Load {
    type Func = LoadFn;
    const NAME: &'static str = "load";

    fn table(exports: &ModuleExports) -> &BTreeMap<String, LoadFn> {
        &exports.load_functions
    }
}

impl OperationKind for Transform {
    type Func = TransformFn;
    const NAME: &'static str = "transformation";

    fn table(exports: &ModuleExports) -> &BTreeMap<String, TransformFn> {
        &exports.transformation_functions
    }

    fn is_native(id: &str) -> bool {
        Table::has_method(id)
    }
}

impl OperationKind for Validate {
    type Func = ValidateFn;
    const NAME: &'static str = "validation";

    fn table(exports: &ModuleExports) -> &BTreeMap<String, ValidateFn> {
        &exports.validation_functions
    }

    fn is_native(id: &str) -> bool {
        Table::has_predicate(id)
    }
}

impl OperationKind for Write {
    type Func = WriteFn;
    const NAME: &'static str = "write";

    fn table(exports: &ModuleExports) -> &BTreeMap<String, WriteFn> {
        &exports.write_functions
    }
}

// =============================================================================
// Resolved operations
// =============================================================================

/// Result of resolving a name.
#[derive(Clone)]
pub enum Operation<F> {
    /// Exported by a registry layer.
    Builtin { layer: String, name: String, func: F },
    /// Imported through `import_from`.
    Custom { module: String, symbol: String, func: F },
    /// A method of the table itself.
    NativeMethod(String),
}

impl<F> fmt::Debug for Operation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Builtin { layer, name, .. } => write!(f, "Builtin({}:{})", layer, name),
            Operation::Custom { module, symbol, .. } => write!(f, "Custom({}.{})", module, symbol),
            Operation::NativeMethod(name) => write!(f, "NativeMethod({})", name),
        }
    }
}

impl<F> Operation<F> {
    fn func(&self) -> Option<&F> {
        match self {
            Operation::Builtin { func, .. } | Operation::Custom { func, .. } => Some(func),
            Operation::NativeMethod(_) => None,
        }
    }

    fn not_callable(&self) -> DataError {
        DataError::failed(format!("{:?}", self), "not callable in this position")
    }
}

impl Operation<LoadFn> {
    pub fn call(&self, path: &Path, kwargs: &Kwargs) -> DataResult<Table> {
        let func = self.func().ok_or_else(|| self.not_callable())?;
        func(path, kwargs)
    }
}

impl Operation<TransformFn> {
    /// Invoke on one leaf. Native methods pass placeholders through.
    pub fn call(&self, data: Option<Table>, kwargs: &Kwargs) -> DataResult<Container> {
        match self {
            Operation::NativeMethod(name) => match data {
                None => Ok(Container::Empty),
                Some(table) => table.call_method(name, kwargs).map(Container::Leaf),
            },
            Operation::Builtin { func, .. } | Operation::Custom { func, .. } => func(data, kwargs),
        }
    }
}

impl Operation<ValidateFn> {
    pub fn call(&self, data: &Table, kwargs: &Kwargs) -> DataResult<Signal> {
        match self {
            Operation::NativeMethod(name) => data.call_predicate(name),
            Operation::Builtin { func, .. } | Operation::Custom { func, .. } => func(data, kwargs),
        }
    }
}

impl Operation<WriteFn> {
    pub fn call(&self, data: &Table, path: &Path, kwargs: &Kwargs) -> DataResult<()> {
        let func = self.func().ok_or_else(|| self.not_callable())?;
        func(data, path, kwargs)
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone)]
struct Layer {
    name: String,
    exports: ModuleExports,
}

/// Layered name → function registry.
#[derive(Debug, Clone)]
pub struct Registry {
    layers: Vec<Layer>,
    catalog: ModuleCatalog,
}

impl Registry {
    /// Builtins only, nothing importable.
    pub fn builtin() -> Self {
        Self::with_catalog(ModuleCatalog::new())
    }

    /// Builtins plus a catalog of importable modules.
    pub fn with_catalog(catalog: ModuleCatalog) -> Self {
        Self {
            layers: vec![Layer {
                name: "builtin".to_string(),
                exports: crate::builtins::exports(),
            }],
            catalog,
        }
    }

    /// Copy of this registry with the named catalog modules layered on top,
    /// in order.
    pub fn layered(&self, extra_modules: &[String]) -> RegistryResult<Registry> {
        let mut registry = self.clone();
        for name in extra_modules {
            let exports = self.catalog.get(name)?.clone();
            tracing::debug!("layering extra module '{}'", name);
            registry.layers.push(Layer {
                name: name.clone(),
                exports,
            });
        }
        Ok(registry)
    }

    /// Push a layer on top.
    pub fn with_layer(mut self, name: &str, exports: ModuleExports) -> Self {
        self.layers.push(Layer {
            name: name.to_string(),
            exports,
        });
        self
    }

    /// Names of the layers, bottom first.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    /// Resolve an operation name.
    pub fn resolve<K: OperationKind>(
        &self,
        id: &str,
        import_from: Option<&str>,
    ) -> RegistryResult<Operation<K::Func>> {
        if id == CUSTOM {
            let import_from = import_from.ok_or_else(|| RegistryError::InvalidImport(String::new()))?;
            let (module, symbol) = import_from
                .rsplit_once('.')
                .filter(|(m, s)| !m.is_empty() && !s.is_empty())
                .ok_or_else(|| RegistryError::InvalidImport(import_from.to_string()))?;
            let exports = self.catalog.get(module)?;
            let func = K::table(exports)
                .get(symbol)
                .cloned()
                .ok_or_else(|| RegistryError::SymbolNotFound {
                    kind: K::NAME,
                    module: module.to_string(),
                    symbol: symbol.to_string(),
                })?;
            tracing::debug!("{} '{}' resolved to custom {}", K::NAME, id, import_from);
            return Ok(Operation::Custom {
                module: module.to_string(),
                symbol: symbol.to_string(),
                func,
            });
        }

        for layer in self.layers.iter().rev() {
            if let Some(func) = K::table(&layer.exports).get(id) {
                tracing::debug!("{} '{}' resolved in layer '{}'", K::NAME, id, layer.name);
                return Ok(Operation::Builtin {
                    layer: layer.name.clone(),
                    name: id.to_string(),
                    func: func.clone(),
                });
            }
        }

        if K::is_native(id) {
            tracing::debug!("{} '{}' resolved to native table method", K::NAME, id);
            return Ok(Operation::NativeMethod(id.to_string()));
        }

        Err(RegistryError::OperationNotFound {
            kind: K::NAME,
            id: id.to_string(),
        })
    }

    /// Every name resolvable for a category, excluding native methods.
    pub fn names<K: OperationKind>(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .layers
            .iter()
            .flat_map(|l| K::table(&l.exports).keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shout(data: Option<Table>, _kwargs: &Kwargs) -> DataResult<Container> {
        Ok(data
            .map(|t| t.fillna(json!("LOUD")))
            .into())
    }

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .register(
                "project.steps",
                ModuleExports::new().with_transformation("shout", shout),
            )
            .register(
                "project.overrides",
                ModuleExports::new().with_transformation("split", |_data, _kwargs| {
                    Ok(Container::Empty)
                }),
            )
    }

    #[test]
    fn test_builtin_resolution() {
        let registry = Registry::builtin();
        let op = registry.resolve::<Transform>("split", None).unwrap();
        assert!(matches!(op, Operation::Builtin { ref layer, .. } if layer == "builtin"));
    }

    #[test]
    fn test_custom_resolution() {
        let registry = Registry::with_catalog(catalog());
        let op = registry
            .resolve::<Transform>(CUSTOM, Some("project.steps.shout"))
            .unwrap();
        assert!(matches!(op, Operation::Custom { ref symbol, .. } if symbol == "shout"));
    }

    #[test]
    fn test_custom_unknown_module() {
        let registry = Registry::with_catalog(catalog());
        let err = registry
            .resolve::<Transform>(CUSTOM, Some("nowhere.shout"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ModuleNotFound(_)));
    }

    #[test]
    fn test_custom_unknown_symbol() {
        let registry = Registry::with_catalog(catalog());
        let err = registry
            .resolve::<Transform>(CUSTOM, Some("project.steps.whisper"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::SymbolNotFound { .. }));
    }

    #[test]
    fn test_custom_malformed_import() {
        let registry = Registry::builtin();
        let err = registry.resolve::<Transform>(CUSTOM, Some("shout")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidImport(_)));
        let err = registry.resolve::<Transform>(CUSTOM, None).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidImport(_)));
    }

    #[test]
    fn test_native_method_fallback() {
        let registry = Registry::builtin();
        let op = registry.resolve::<Transform>("rename", None).unwrap();
        assert!(matches!(op, Operation::NativeMethod(ref n) if n == "rename"));

        let op = registry.resolve::<Validate>("isnull", None).unwrap();
        assert!(matches!(op, Operation::NativeMethod(_)));
    }

    #[test]
    fn test_native_method_passes_placeholder() {
        let op = Registry::builtin().resolve::<Transform>("head", None).unwrap();
        assert_eq!(op.call(None, &Kwargs::new()).unwrap(), Container::Empty);
    }

    #[test]
    fn test_not_found() {
        let registry = Registry::builtin();
        let err = registry.resolve::<Transform>("frobnicate", None).unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
        // native methods are not loaders
        assert!(registry.resolve::<Load>("rename", None).is_err());
    }

    #[test]
    fn test_later_layers_override() {
        let registry = Registry::with_catalog(catalog())
            .layered(&["project.overrides".to_string()])
            .unwrap();
        let op = registry.resolve::<Transform>("split", None).unwrap();
        assert!(matches!(op, Operation::Builtin { ref layer, .. } if layer == "project.overrides"));
        assert_eq!(registry.layer_names(), vec!["builtin", "project.overrides"]);
    }

    #[test]
    fn test_layering_unknown_module() {
        let err = Registry::builtin()
            .layered(&["missing.module".to_string()])
            .unwrap_err();
        assert!(matches!(err, RegistryError::ModuleNotFound(_)));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = Registry::with_catalog(catalog());
        let first = format!("{:?}", registry.resolve::<Transform>("dropna", None).unwrap());
        let second = format!("{:?}", registry.resolve::<Transform>("dropna", None).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_names() {
        let names = Registry::builtin().names::<Write>();
        assert_eq!(names, vec!["csv", "json"]);
    }
}
