//! Serves a small user directory in-process and calls it through a batching
//! client. Pass a TOML config path as the first argument to override the
//! defaults; set `RUST_LOG=debug` to see every call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context as _;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use typack::Schema;
use tyrpc::CallError;
use tyrpc::ProcedureRef;
use tyrun::Client;
use tyrun::Config;
use tyrun::Context;
use tyrun::HandlerError;
use tyrun::LocalTransport;
use tyrun::Procedure;
use tyrun::Router;
use tyrun::Server;
use tyrun::logging;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NewUser {
    name: String,
}

const GET_BY_ID: ProcedureRef<String, User> = ProcedureRef::query("user.getById");
const GET_ALL: ProcedureRef<(), Vec<User>> = ProcedureRef::query("user.getAll");
const CREATE: ProcedureRef<NewUser, User> = ProcedureRef::mutation("user.create");

type Directory = Arc<Mutex<BTreeMap<String, User>>>;

fn lock(directory: &Directory) -> anyhow::Result<std::sync::MutexGuard<'_, BTreeMap<String, User>>> {
    directory.lock().map_err(|_| anyhow::anyhow!("user directory lock poisoned"))
}

fn user_router(directory: Directory) -> anyhow::Result<Router> {
    let by_id = directory.clone();
    let all = directory.clone();
    let create = directory;

    let router = Router::builder()
        .implement(
            &GET_BY_ID,
            Procedure::query().input(Schema::string().non_empty()),
            move |_ctx: Context, id: String| {
                let found = lock(&by_id).map(|users| users.get(&id).cloned());
                async move {
                    match found {
                        Ok(Some(user)) => Ok(user),
                        Ok(None) => Err(HandlerError::from(CallError::not_found(format!("no user '{}'", id)))),
                        Err(fault) => Err(HandlerError::from(fault)),
                    }
                }
            },
        )?
        .implement(&GET_ALL, Procedure::query(), move |_ctx: Context, _: ()| {
            let users = lock(&all).map(|users| users.values().cloned().collect::<Vec<_>>());
            async move { users }
        })?
        .implement(
            &CREATE,
            Procedure::mutation().input(Schema::object().field("name", Schema::string().min_len(1).max_len(64))),
            move |_ctx: Context, input: NewUser| {
                let created = lock(&create).map(|mut users| {
                    if users.values().any(|u| u.name == input.name) {
                        return Err(CallError::conflict(format!("user '{}' already exists", input.name)));
                    }
                    let user = User {
                        id: (users.len() + 100).to_string(),
                        name: input.name,
                    };
                    users.insert(user.id.clone(), user.clone());
                    Ok(user)
                });
                async move {
                    match created {
                        Ok(Ok(user)) => Ok(user),
                        Ok(Err(err)) => Err(HandlerError::from(err)),
                        Err(fault) => Err(HandlerError::from(fault)),
                    }
                }
            },
        )?
        .build();
    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };

    let directory: Directory = Arc::new(Mutex::new(BTreeMap::new()));
    lock(&directory)?.insert(
        "123".into(),
        User {
            id: "123".into(),
            name: "Ada".into(),
        },
    );

    let router = user_router(directory)?;
    info!(procedures = router.len(), "router assembled");
    println!("{}", serde_json::to_string_pretty(&router.describe())?);

    let server = Arc::new(Server::new(router).with_config(config.server.clone())?);
    let client = Client::batched(Arc::new(LocalTransport::new(server)), &config.client);

    let get = client.bind(&GET_BY_ID);
    let create = client.bind(&CREATE);
    let (known, unknown) = ("123".to_string(), "999".to_string());
    let grace = NewUser { name: "Grace".into() };

    let (found, missing, created, malformed) = tokio::join!(
        get.call(&known),
        get.call(&unknown),
        create.call(&grace),
        client.call("user.getById", json!(42)),
    );

    println!("user.getById(\"123\") -> {:?}", found);
    println!("user.getById(\"999\") -> {:?}", missing.map_err(|e| e.code()));
    println!("user.create(Grace)   -> {:?}", created);
    println!("user.getById(42)     -> {:?}", malformed.map_err(|e| e.to_string()));

    let users = client.query(&GET_ALL, &()).await?;
    println!("user.getAll()        -> {} users", users.len());
    Ok(())
}
