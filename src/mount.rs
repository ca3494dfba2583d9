//! Mount resolver: a tree of published virtual-path -> filesystem-path
//! bindings. The scanner walks a published virtual directory by resolving
//! it to a filesystem path here and by asking for any child mount points
//! that aren't themselves backed by that filesystem directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::path::VirtualPath;

#[derive(Default)]
pub struct MountNode {
    fs_path: Option<PathBuf>,
    children: BTreeMap<String, MountNode>,
}

impl MountNode {
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(|s| s.as_str())
    }

    pub fn fs_path(&self) -> Option<&Path> {
        self.fs_path.as_deref()
    }

    pub fn child(&self, name: &str) -> Option<&MountNode> {
        self.children.get(name)
    }
}

pub struct MountTree {
    root: MountNode,
}

impl MountTree {
    pub fn new() -> Self {
        MountTree { root: MountNode::default() }
    }

    /// Registers a virtual -> filesystem binding, creating intermediate
    /// nodes as needed. Called once per `published_paths` entry at startup.
    pub fn mount(&mut self, virtual_path: &str, fs_path: PathBuf) {
        let vp = VirtualPath::new(virtual_path);
        let mut node = &mut self.root;
        if !vp.is_empty() {
            for component in vp.as_str().split('/') {
                node = node.children.entry(component.to_string()).or_default();
            }
        }
        node.fs_path = Some(fs_path);
    }

    /// Walks the tree from the root consuming components of `virtual_path`
    /// as long as they match a mounted child; the last filesystem binding
    /// seen along the way is chosen, and any unconsumed virtual suffix is
    /// appended to it.
    pub fn virtual_to_fs(&self, virtual_path: &str) -> Option<PathBuf> {
        let vp = VirtualPath::new(virtual_path);
        let components: Vec<&str> = if vp.is_empty() { Vec::new() } else { vp.as_str().split('/').collect() };

        let mut node = &self.root;
        let mut last_binding = node.fs_path.clone();
        let mut consumed = 0usize;
        for component in &components {
            match node.children.get(*component) {
                Some(child) => {
                    node = child;
                    consumed += 1;
                    if let Some(fp) = &node.fs_path {
                        last_binding = Some(fp.clone());
                    }
                }
                None => break,
            }
        }

        last_binding.map(|base| {
            let mut full = base;
            for component in &components[consumed..] {
                full.push(component);
            }
            full
        })
    }

    /// The sub-tree of mount points rooted at `virtual_path`, for
    /// enumerating child mounts the scanner must visit even when they are
    /// not entries of the parent's own filesystem directory.
    pub fn subdir(&self, virtual_path: &str) -> Option<&MountNode> {
        let vp = VirtualPath::new(virtual_path);
        let mut node = &self.root;
        if vp.is_empty() {
            return Some(node);
        }
        for component in vp.as_str().split('/') {
            node = node.children.get(component)?;
        }
        Some(node)
    }
}

impl Default for MountTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_mount_resolves_bare_virtual_path() {
        let mut tree = MountTree::new();
        tree.mount("", PathBuf::from("/srv/repo"));
        assert_eq!(tree.virtual_to_fs("a/b"), Some(PathBuf::from("/srv/repo/a/b")));
    }

    #[test]
    fn nested_mount_overrides_parent_binding_for_its_subtree() {
        let mut tree = MountTree::new();
        tree.mount("", PathBuf::from("/srv/repo"));
        tree.mount("docs", PathBuf::from("/srv/docs-repo"));
        assert_eq!(tree.virtual_to_fs("docs/readme.md"), Some(PathBuf::from("/srv/docs-repo/readme.md")));
        assert_eq!(tree.virtual_to_fs("other/file"), Some(PathBuf::from("/srv/repo/other/file")));
    }

    #[test]
    fn unmounted_virtual_path_resolves_to_none() {
        let tree = MountTree::new();
        assert_eq!(tree.virtual_to_fs("anything"), None);
    }

    #[test]
    fn subdir_exposes_child_mount_points() {
        let mut tree = MountTree::new();
        tree.mount("", PathBuf::from("/srv/repo"));
        tree.mount("a/b", PathBuf::from("/srv/b-repo"));
        let sub = tree.subdir("a").unwrap();
        assert_eq!(sub.child_names().collect::<Vec<_>>(), vec!["b"]);
    }
}
