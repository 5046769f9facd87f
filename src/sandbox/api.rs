//! Host API exposed to plugin scripts

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Map};

use crate::routing::{HandlerRef, MethodFilter, Reply, RouteBuilder, RouteOptions};

type ScriptResult<T> = std::result::Result<T, Box<EvalAltResult>>;

const VERBS: [MethodFilter; 6] = [
    MethodFilter::Get,
    MethodFilter::Put,
    MethodFilter::Post,
    MethodFilter::Delete,
    MethodFilter::Patch,
    MethodFilter::All,
];

/// Register the `Router` and `Reply` types on a plugin engine
pub fn register(engine: &mut Engine) {
    register_router(engine);
    register_reply(engine);
}

fn register_router(engine: &mut Engine) {
    engine.register_type_with_name::<RouteBuilder>("Router");

    for method in VERBS {
        let verb = method.verb();

        engine.register_fn(
            verb,
            move |router: &mut RouteBuilder, path: ImmutableString, handler: ImmutableString| {
                add_route(router, method, &path, HandlerRef::named(handler.as_str()), None)
            },
        );
        engine.register_fn(
            verb,
            move |router: &mut RouteBuilder, path: ImmutableString, handler: FnPtr| {
                add_route(router, method, &path, handler_from_ptr(&handler)?, None)
            },
        );
        engine.register_fn(
            verb,
            move |router: &mut RouteBuilder,
                  path: ImmutableString,
                  handler: ImmutableString,
                  options: Map| {
                add_route(
                    router,
                    method,
                    &path,
                    HandlerRef::named(handler.as_str()),
                    Some(options),
                )
            },
        );
        engine.register_fn(
            verb,
            move |router: &mut RouteBuilder,
                  path: ImmutableString,
                  handler: FnPtr,
                  options: Map| {
                add_route(router, method, &path, handler_from_ptr(&handler)?, Some(options))
            },
        );
    }
}

fn handler_from_ptr(ptr: &FnPtr) -> ScriptResult<HandlerRef> {
    if ptr.is_anonymous() {
        return Err("route handlers must be named functions".into());
    }
    Ok(HandlerRef {
        name: ptr.fn_name().to_string(),
        curry: ptr.curry().to_vec(),
    })
}

fn add_route(
    router: &RouteBuilder,
    method: MethodFilter,
    path: &str,
    handler: HandlerRef,
    options: Option<Map>,
) -> ScriptResult<()> {
    let options = match options {
        Some(map) => {
            let raw: serde_json::Value = rhai::serde::from_dynamic(&Dynamic::from_map(map))?;
            RouteOptions::from_value(raw)
        }
        None => RouteOptions::default(),
    };

    router
        .register(method, path, handler, options)
        .map_err(|e| e.to_string().into())
}

fn register_reply(engine: &mut Engine) {
    engine
        .register_type_with_name::<Reply>("Reply")
        .register_fn("status", Reply::status)
        .register_fn(
            "header",
            |reply: &mut Reply, name: ImmutableString, value: ImmutableString| {
                reply.header(&name, &value)
            },
        )
        .register_fn("send", |reply: &mut Reply, body: Dynamic| reply.send(body))
        .register_fn("send", |reply: &mut Reply| reply.send(Dynamic::UNIT))
        .register_fn("not_found", Reply::not_found);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rhai::Scope;

    use super::*;
    use crate::routing::RouterFactory;

    fn builder() -> RouteBuilder {
        let functions = BTreeMap::from([
            ("index".to_string(), vec![2]),
            ("scoped".to_string(), vec![3]),
        ]);
        RouterFactory::new("/api").build_namespace_router("demo", Arc::new(functions))
    }

    fn run_setup(script: &str) -> (RouteBuilder, ScriptResult<()>) {
        let mut engine = Engine::new();
        register(&mut engine);

        let router = builder();
        let mut scope = Scope::new();
        scope.push("router", router.clone());
        let result = engine.run_with_scope(&mut scope, script);
        (router, result)
    }

    #[test]
    fn register_by_name_pointer_and_options() {
        let (router, result) = run_setup(
            r#"
            fn index(req, reply) {}
            fn scoped(prefix, req, reply) {}

            router.get("/", "index");
            router.post("/", Fn("index"));
            router.all("/x", Fn("scoped").curry("p"));
            router.put("/y", "index", #{ constraints: #{ host: "a.example.com" } });
            "#,
        );

        result.unwrap();
        assert_eq!(router.len(), 4);
    }

    #[test]
    fn undefined_handler_fails_setup() {
        let (router, result) = run_setup(r#"router.get("/", "missing");"#);
        assert!(result.is_err());
        assert!(router.is_empty());
    }

    #[test]
    fn anonymous_handler_fails_setup() {
        let (_, result) = run_setup(r#"router.get("/", |req, reply| reply.send("x"));"#);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("named functions"), "{err}");
    }

    #[test]
    fn reply_chaining() {
        let mut engine = Engine::new();
        register(&mut engine);

        let reply = Reply::new();
        let mut scope = Scope::new();
        scope.push("reply", reply.clone());
        engine
            .run_with_scope(
                &mut scope,
                r#"reply.status(201).header("X-Id", "7").send(#{ id: "7" });"#,
            )
            .unwrap();

        let response = reply.finish("POST", "/", Dynamic::UNIT).unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.header("x-id"), Some("7"));
    }
}
