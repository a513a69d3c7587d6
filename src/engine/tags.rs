use std::collections::HashMap;

/// Tracks in-flight counts per concurrency tag and admits tasks only when
/// every tag they carry is below its configured limit. Tags without a
/// configured limit impose no constraint; untagged tasks are always
/// admissible. Private to the scheduler thread — no locking required.
pub struct TagController {
    limits: HashMap<String, usize>,
    inflight: HashMap<String, usize>,
}

impl TagController {
    pub fn new(limits: HashMap<String, usize>) -> Self {
        let inflight = limits.keys().map(|k| (k.clone(), 0)).collect();
        Self { limits, inflight }
    }

    pub fn can_admit(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| match self.limits.get(tag) {
            Some(&limit) => self.inflight.get(tag).copied().unwrap_or(0) < limit,
            None => true,
        })
    }

    pub fn on_start(&mut self, tags: &[String]) {
        for tag in tags {
            if self.limits.contains_key(tag) {
                *self.inflight.entry(tag.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn on_finish(&mut self, tags: &[String]) {
        for tag in tags {
            if let Some(count) = self.inflight.get_mut(tag) {
                *count = count.saturating_sub(1);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn inflight(&self, tag: &str) -> usize {
        self.inflight.get(tag).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn untagged_always_admitted() {
        let ctl = TagController::new(HashMap::new());
        assert!(ctl.can_admit(&[]));
    }

    #[test]
    fn unlimited_tag_always_admitted() {
        let ctl = TagController::new(HashMap::new());
        assert!(ctl.can_admit(&tags(&["io"])));
    }

    #[test]
    fn blocks_at_limit() {
        let mut ctl = TagController::new(HashMap::from([("io".to_string(), 2)]));
        assert!(ctl.can_admit(&tags(&["io"])));
        ctl.on_start(&tags(&["io"]));
        assert!(ctl.can_admit(&tags(&["io"])));
        ctl.on_start(&tags(&["io"]));
        assert_eq!(ctl.inflight("io"), 2);
        assert!(!ctl.can_admit(&tags(&["io"])));
    }

    #[test]
    fn on_finish_reopens_admission() {
        let mut ctl = TagController::new(HashMap::from([("io".to_string(), 1)]));
        ctl.on_start(&tags(&["io"]));
        assert!(!ctl.can_admit(&tags(&["io"])));
        ctl.on_finish(&tags(&["io"]));
        assert!(ctl.can_admit(&tags(&["io"])));
    }

    #[test]
    fn on_finish_saturates_at_zero() {
        let mut ctl = TagController::new(HashMap::from([("io".to_string(), 1)]));
        ctl.on_finish(&tags(&["io"]));
        assert_eq!(ctl.inflight("io"), 0);
    }

    #[test]
    fn all_tags_must_be_below_limit() {
        let mut ctl = TagController::new(HashMap::from([
            ("io".to_string(), 2),
            ("cpu".to_string(), 1),
        ]));
        ctl.on_start(&tags(&["cpu"]));
        assert!(!ctl.can_admit(&tags(&["io", "cpu"])));
        assert!(ctl.can_admit(&tags(&["io"])));
    }
}
