use std::path::Path;
use std::sync::{Arc, Mutex};

use minipug::{content_hash, Environment, TemplateCache};
use serde_json::json;

use similar_asserts::assert_eq;

#[test]
fn test_put_and_get() {
    let mut cache = TemplateCache::new();
    cache.put("a.pug", "<p>a</p>".into(), 1);
    assert_eq!(cache.get("a.pug"), Some("<p>a</p>"));
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.get("b.pug"), None);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hit_rate, 0.5);
}

#[test]
fn test_hash_validation() {
    let mut cache = TemplateCache::new();
    let hash = content_hash("p a");
    assert_eq!(hash, content_hash("p a"));
    assert_ne!(hash, content_hash("p b"));

    cache.put("a.pug", "<p>a</p>".into(), hash);
    assert_eq!(cache.get_if_valid("a.pug", content_hash("p b")), None);
    assert_eq!(cache.get_if_valid("a.pug", hash), Some("<p>a</p>"));
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_eviction_is_oldest_first() {
    let mut cache = TemplateCache::with_max_size(2);
    cache.put("a", "a".into(), 0);
    cache.put("b", "b".into(), 0);
    // replacing an existing key does not evict
    cache.put("a", "a2".into(), 0);
    assert_eq!(cache.len(), 2);
    cache.put("c", "c".into(), 0);
    assert_eq!(cache.len(), 2);
    assert!(cache.entry("b").is_none());
    assert_eq!(cache.entry("a").map(|x| x.html()), Some("a2"));
    assert_eq!(cache.entry("c").map(|x| x.html()), Some("c"));
}

#[test]
fn test_invalidate_and_clear() {
    let mut cache = TemplateCache::new();
    cache.put("a", "a".into(), 0);
    cache.put("b", "b".into(), 0);
    assert!(cache.invalidate("a"));
    assert!(!cache.invalidate("a"));
    assert_eq!(cache.len(), 1);
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn test_static_includes_are_cached() {
    let sources = Arc::new(Mutex::new(String::from("footer static")));
    let mut env = Environment::new();
    env.set_base_path("/views");
    env.set_cache(TemplateCache::with_max_size(8));
    {
        let sources = sources.clone();
        env.set_loader(move |path: &Path| {
            Ok(match path.to_str() {
                Some("/views/footer.pug") => Some(sources.lock().unwrap().clone()),
                Some("/views/dynamic.pug") => Some("p= n".into()),
                _ => None,
            })
        });
    }

    let tmpl = env
        .template_from_str("include footer\ninclude dynamic")
        .unwrap();
    assert_eq!(
        tmpl.render(json!({"n": 1})).unwrap(),
        "<footer>static</footer><p>1</p>"
    );
    assert_eq!(
        tmpl.render(json!({"n": 2})).unwrap(),
        "<footer>static</footer><p>2</p>"
    );
    {
        let cache = env.cache().unwrap().lock().unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
        assert!(cache.entry("/views/footer.pug").is_some());
    }

    // a changed source no longer matches the stored hash
    *sources.lock().unwrap() = "footer changed".into();
    assert_eq!(
        tmpl.render(json!({"n": 3})).unwrap(),
        "<footer>changed</footer><p>3</p>"
    );
    let cache = env.cache().unwrap().lock().unwrap();
    assert_eq!(
        cache.entry("/views/footer.pug").map(|x| x.html()),
        Some("<footer>changed</footer>")
    );
}
