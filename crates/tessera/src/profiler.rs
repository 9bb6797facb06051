//! Hierarchical named timings collected when profiling is enabled.

use std::time::{Duration, Instant};

/// One node of a performance profile.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceProfile {
    pub name: String,
    pub duration: Duration,
    pub children: Vec<PerformanceProfile>,
}

impl PerformanceProfile {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
            children: Vec::new(),
        }
    }

    /// Depth-first search for the first node called `name`.
    pub fn find(&self, name: &str) -> Option<&PerformanceProfile> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

struct OpenSection {
    profile: PerformanceProfile,
    started: Instant,
}

/// Builds a [`PerformanceProfile`] from nested `enter`/`exit` calls.
pub struct Profiler {
    stack: Vec<OpenSection>,
}

impl Profiler {
    pub fn new(root: &str) -> Self {
        Self {
            stack: vec![OpenSection {
                profile: PerformanceProfile::new(root, Duration::ZERO),
                started: Instant::now(),
            }],
        }
    }

    pub fn enter(&mut self, name: impl Into<String>) {
        self.stack.push(OpenSection {
            profile: PerformanceProfile::new(name, Duration::ZERO),
            started: Instant::now(),
        });
    }

    /// Close the innermost section. The root section is only closed by [`Profiler::finish`].
    pub fn exit(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        if let Some(mut section) = self.stack.pop() {
            section.profile.duration = section.started.elapsed();
            if let Some(parent) = self.stack.last_mut() {
                parent.profile.children.push(section.profile);
            }
        }
    }

    /// Attach an already measured section to the innermost open section.
    pub fn record(&mut self, profile: PerformanceProfile) {
        if let Some(parent) = self.stack.last_mut() {
            parent.profile.children.push(profile);
        }
    }

    /// Close every open section and return the root.
    pub fn finish(mut self) -> PerformanceProfile {
        while self.stack.len() > 1 {
            self.exit();
        }
        match self.stack.pop() {
            Some(mut root) => {
                root.profile.duration = root.started.elapsed();
                root.profile
            }
            None => PerformanceProfile::new("", Duration::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sections() {
        let mut profiler = Profiler::new("render");
        profiler.enter("partial:a");
        profiler.enter("partial:b");
        profiler.exit();
        profiler.exit();
        profiler.enter("partial:c");
        let profile = profiler.finish();

        assert_eq!(profile.name, "render");
        let names: Vec<&str> = profile.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["partial:a", "partial:c"]);
        assert!(profile.find("partial:b").is_some());
    }

    #[test]
    fn test_exit_never_pops_root() {
        let mut profiler = Profiler::new("render");
        profiler.exit();
        profiler.exit();
        assert_eq!(profiler.finish().name, "render");
    }
}
