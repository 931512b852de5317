#![no_main]
use std::collections::BTreeMap;
use std::path::Path;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde::Serialize;

#[derive(Debug, Serialize, Arbitrary)]
enum Value {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

fuzz_target!(|data: (&str, Vec<(&str, &str)>, BTreeMap<String, Value>)| {
    let (root, includes, ctx) = data;

    let mut env = minipug::Environment::new();
    env.set_base_path("/fuzz");
    env.set_fuel(Some(50_000));
    env.set_max_loop_iterations(1000);
    env.set_loader(minipug::memory_loader(
        includes
            .into_iter()
            .map(|(name, source)| (Path::new("/fuzz").join(name), source.to_string())),
    ));

    let tmpl = match env.template_from_str(root) {
        Ok(tmpl) => tmpl,
        Err(_) => return,
    };
    tmpl.render(&ctx).ok();
});
