use domain::{Origin, Rule};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 规则表与两张反向索引（源 → 规则、设备 → 规则）。
///
/// 源与设备只通过 UUID 引用规则，分发时再回查规则表。
#[derive(Debug, Default)]
pub(crate) struct RuleIndex {
    rules: BTreeMap<String, Rule>,
    by_source: HashMap<String, BTreeSet<String>>,
    by_device: HashMap<String, BTreeSet<String>>,
}

impl RuleIndex {
    pub(crate) fn insert(&mut self, rule: Rule) -> Option<Rule> {
        let previous = self.remove(&rule.uuid);
        if let Some(source) = &rule.source {
            self.by_source
                .entry(source.clone())
                .or_default()
                .insert(rule.uuid.clone());
        }
        if let Some(device) = &rule.device {
            self.by_device
                .entry(device.clone())
                .or_default()
                .insert(rule.uuid.clone());
        }
        self.rules.insert(rule.uuid.clone(), rule);
        previous
    }

    pub(crate) fn remove(&mut self, uuid: &str) -> Option<Rule> {
        let rule = self.rules.remove(uuid)?;
        if let Some(source) = &rule.source {
            unlink(&mut self.by_source, source, uuid);
        }
        if let Some(device) = &rule.device {
            unlink(&mut self.by_device, device, uuid);
        }
        Some(rule)
    }

    pub(crate) fn get(&self, uuid: &str) -> Option<&Rule> {
        self.rules.get(uuid)
    }

    pub(crate) fn all(&self) -> Vec<Rule> {
        self.rules.values().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }

    /// 绑定到来源的规则，按规则 UUID 排序
    pub(crate) fn bound(&self, origin: &Origin) -> Vec<Rule> {
        let index = match origin {
            Origin::Source(_) => &self.by_source,
            Origin::Device(_) => &self.by_device,
        };
        index
            .get(origin.uuid())
            .map(|uuids| {
                uuids
                    .iter()
                    .filter_map(|uuid| self.rules.get(uuid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 绑定到某个源或设备的全部规则 UUID
    pub(crate) fn bound_uuids(&self, resource: &str) -> Vec<String> {
        self.rules
            .values()
            .filter(|rule| rule.bound_to(resource))
            .map(|rule| rule.uuid.clone())
            .collect()
    }
}

fn unlink(index: &mut HashMap<String, BTreeSet<String>>, key: &str, uuid: &str) {
    if let Some(set) = index.get_mut(key) {
        set.remove(uuid);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(uuid: &str, source: Option<&str>, device: Option<&str>) -> Rule {
        Rule {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            source: source.map(str::to_string),
            device: device.map(str::to_string),
            targets: vec![],
            success: String::new(),
            actions: "function Action(x) return x end".to_string(),
            failed: String::new(),
            description: String::new(),
        }
    }

    #[test]
    fn insert_replaces_and_relinks() {
        let mut index = RuleIndex::default();
        index.insert(rule("R1", Some("S1"), None));
        index.insert(rule("R2", Some("S1"), Some("D1")));
        assert_eq!(index.bound(&Origin::Source("S1".into())).len(), 2);
        assert_eq!(index.bound(&Origin::Device("D1".into())).len(), 1);

        let previous = index.insert(rule("R1", Some("S2"), None));
        assert_eq!(previous.unwrap().source.as_deref(), Some("S1"));
        assert_eq!(index.bound(&Origin::Source("S1".into())).len(), 1);
        assert_eq!(index.bound(&Origin::Source("S2".into())).len(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn remove_prunes_empty_bindings() {
        let mut index = RuleIndex::default();
        index.insert(rule("R1", None, Some("D1")));
        assert!(index.remove("R1").is_some());
        assert!(index.remove("R1").is_none());
        assert!(index.by_device.is_empty());
        assert!(index.bound(&Origin::Device("D1".into())).is_empty());
    }

    #[test]
    fn device_and_source_namespaces_are_separate() {
        let mut index = RuleIndex::default();
        index.insert(rule("R1", Some("X"), None));
        assert!(index.bound(&Origin::Device("X".into())).is_empty());
        assert_eq!(index.bound_uuids("X"), vec!["R1".to_string()]);
    }
}
