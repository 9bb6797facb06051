//! Context chain used during rendering.
//!
//! A [`Context`] points at one value and links to the context it was resolved from. Chains are
//! built per render and never mutated once constructed.

use crate::value::Value;
use std::rc::Rc;

/// Position of a context inside a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub index: usize,
    /// `false` when the loop cannot know whether more iterations follow (`while`, `do`).
    pub last: bool,
}

#[derive(Debug)]
pub struct Context {
    key: String,
    value: Value,
    exists: bool,
    parent: Option<Rc<Context>>,
    collection: Option<CollectionInfo>,
}

impl Context {
    /// Create a root context
    pub fn root(value: Value) -> Rc<Self> {
        Rc::new(Self {
            key: String::new(),
            value,
            exists: true,
            parent: None,
            collection: None,
        })
    }

    /// Create a context for `value` reached from `parent` through `key`
    pub fn child(parent: &Rc<Context>, key: impl Into<String>, value: Value) -> Rc<Self> {
        Rc::new(Self {
            key: key.into(),
            value,
            exists: true,
            parent: Some(Rc::clone(parent)),
            collection: None,
        })
    }

    /// Create a context for a path segment that did not resolve
    pub fn missing(parent: &Rc<Context>, key: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            key: key.into(),
            value: Value::Null,
            exists: false,
            parent: Some(Rc::clone(parent)),
            collection: None,
        })
    }

    /// Create the context of one loop iteration
    pub fn collection_item(
        parent: &Rc<Context>,
        value: Value,
        info: CollectionInfo,
    ) -> Rc<Self> {
        Rc::new(Self {
            key: format!("[{}]", info.index),
            value,
            exists: true,
            parent: Some(Rc::clone(parent)),
            collection: Some(info),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// `false` for the result of a path that did not resolve
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn parent(&self) -> Option<&Rc<Context>> {
        self.parent.as_ref()
    }

    /// Context reached by `..`. Loop iterations step over the collection they came from; the
    /// root is its own parent.
    pub fn lexical_parent(this: &Rc<Context>) -> Rc<Context> {
        let parent = match (&this.collection, &this.parent) {
            (Some(_), Some(parent)) => parent.parent.as_ref().unwrap_or(parent),
            (None, Some(parent)) => parent,
            (_, None) => this,
        };
        Rc::clone(parent)
    }

    /// Follow parent links to the top of the chain
    pub fn root_of(this: &Rc<Context>) -> Rc<Context> {
        let mut current = this;
        while let Some(parent) = &current.parent {
            current = parent;
        }
        Rc::clone(current)
    }

    /// Nearest loop position in this chain
    pub fn collection(&self) -> Option<CollectionInfo> {
        let mut current = Some(self);
        while let Some(context) = current {
            if context.collection.is_some() {
                return context.collection;
            }
            current = context.parent.as_deref();
        }
        None
    }

    /// Keys from the root to this context, for error messages
    pub fn path(&self) -> String {
        let mut keys = Vec::new();
        let mut current = Some(self);
        while let Some(context) = current {
            if !context.key.is_empty() {
                keys.push(context.key.as_str());
            }
            current = context.parent.as_deref();
        }
        keys.reverse();
        let mut path = String::new();
        for key in keys {
            if !path.is_empty() && !key.starts_with('[') {
                path.push('.');
            }
            path.push_str(key);
        }
        if path.is_empty() {
            path.push('~');
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Rc<Context> {
        Context::root(Value::object([(
            "user",
            Value::object([("name", Value::from("Alice"))]),
        )]))
    }

    #[test]
    fn test_child_links_parent() {
        let root = sample();
        let user = Context::child(&root, "user", root.value().get("user").cloned().unwrap());
        assert!(Rc::ptr_eq(user.parent().unwrap(), &root));
        assert!(Rc::ptr_eq(&Context::root_of(&user), &root));
    }

    #[test]
    fn test_missing_context() {
        let root = sample();
        let missing = Context::missing(&root, "nope");
        assert!(!missing.exists());
        assert!(missing.value().is_null());
    }

    #[test]
    fn test_collection_is_inherited() {
        let root = sample();
        let item = Context::collection_item(
            &root,
            Value::Integer(1),
            CollectionInfo {
                index: 2,
                last: true,
            },
        );
        let nested = Context::child(&item, "inner", Value::Null);
        assert_eq!(nested.collection().map(|c| c.index), Some(2));
        assert_eq!(root.collection(), None);
    }

    #[test]
    fn test_lexical_parent_skips_collection() {
        let root = sample();
        let items = Context::child(&root, "items", Value::Null);
        let item = Context::collection_item(
            &items,
            Value::Integer(3),
            CollectionInfo {
                index: 0,
                last: true,
            },
        );
        assert!(Rc::ptr_eq(&Context::lexical_parent(&item), &root));
        assert!(Rc::ptr_eq(&Context::lexical_parent(&items), &root));
        assert!(Rc::ptr_eq(&Context::lexical_parent(&root), &root));
    }

    #[test]
    fn test_path_breadcrumb() {
        let root = sample();
        let items = Context::child(&root, "items", Value::Null);
        let item = Context::collection_item(
            &items,
            Value::Null,
            CollectionInfo {
                index: 1,
                last: false,
            },
        );
        let name = Context::child(&item, "name", Value::Null);
        assert_eq!(name.path(), "items[1].name");
        assert_eq!(root.path(), "~");
    }
}
