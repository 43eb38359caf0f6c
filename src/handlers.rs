//! Command dispatch: decodes one request line, consults the core
//! components, and produces a response envelope.
//!
//! Grounded in spec.md §6's command table. The concrete branches here are
//! explicitly out of scope per spec.md §1 ("the concrete request handlers'
//! business branches beyond what exercises the core") — this module exists
//! only so the core components (SessionAuth, RoomDirectory, CacheEngine via
//! ChatPersistence, IdIssuer) have a realistic caller to exercise them
//! end-to-end, the same role `user.rs`/`routes.rs` played for the teacher's
//! WebSocket handlers.

use crate::conn::Connection;
use crate::context::AppContext;
use crate::error::AppError;
use crate::protocol::{Request, Response};

const DEFAULT_ROOM: i64 = 1;
const DEFAULT_HISTORY_LIMIT: i64 = 10;

pub async fn dispatch(ctx: &AppContext, conn: &Connection, line: &str) -> Response {
    let req = match Request::parse(line) {
        Ok(req) => req,
        Err(e) => return Response::fail().err(format!("bad request: {}", e)),
    };

    match req.cmd.as_str() {
        "login" => login(ctx, conn, &req).await,
        "register" => register(ctx, &req).await,
        "reset_pass" => reset_pass(ctx, &req).await,
        "update_name" => update_name(ctx, conn, &req).await,
        "join_room" => join_room(ctx, conn, &req).await,
        "leave_room" => leave_room(ctx, conn).await,
        "list_rooms" => list_rooms(ctx).await,
        "send_msg" => send_msg(ctx, conn, &req).await,
        "get_history" => get_history(ctx, conn, &req).await,
        "echo" => Response::ok().field("data", req.str("msg").unwrap_or("").to_string()),
        "upper" => Response::ok().field("data", req.str("msg").unwrap_or("").to_uppercase()),
        "quit" => Response::ok().field("data", "bye").close(),
        other => Response::fail().err(format!("unknown cmd: {}", other)),
    }
}

fn require_auth(conn: &Connection) -> Result<(), Response> {
    if conn.is_authed() {
        Ok(())
    } else {
        Err(Response::fail().err("please login first"))
    }
}

/// Places `conn` into room 1, shrinking to "logged in, roomless" on
/// overflow exactly as spec.md §8 scenario 4 describes.
fn join_default_room(ctx: &AppContext, conn: &Connection) -> Response {
    if ctx.rooms.try_join(DEFAULT_ROOM, ctx.config.max_room_size) {
        conn.set_room(DEFAULT_ROOM);
        Response::ok().field("roomId", DEFAULT_ROOM).msg("login success")
    } else {
        Response::ok().field("roomId", 0).msg(format!(
            "login success, but room {} is full",
            DEFAULT_ROOM
        ))
    }
}

async fn login(ctx: &AppContext, conn: &Connection, req: &Request) -> Response {
    let mode = req.str("mode").unwrap_or("password");
    let login_result = match mode {
        "password" => {
            let (user, pass) = match (req.str("user"), req.str("pass")) {
                (Some(u), Some(p)) => (u, p),
                _ => return Response::fail().err("user and pass required"),
            };
            ctx.auth
                .authenticate(user, pass)
                .await
                .map(|id| (id, user.to_string()))
        }
        "sms" => {
            let (phone, code) = match (req.str("phone"), req.str("code")) {
                (Some(p), Some(c)) => (p, c),
                _ => return Response::fail().err("phone and code required"),
            };
            let verified = match ctx.kv_pool.acquire().await {
                Some(kv) => ctx.sms.verify_code(&kv, phone, code),
                None => return Response::fail().msg("login failed"),
            };
            if !verified {
                Err(AppError::BadSmsCode)
            } else {
                match ctx.auth.load_by_phone(phone).await {
                    Ok(Some(user)) => Ok((user.id, user.username)),
                    Ok(None) => Err(AppError::UserNotFound),
                    Err(e) => Err(e),
                }
            }
        }
        other => return Response::fail().err(format!("unknown login mode: {}", other)),
    };

    match login_result {
        Ok((id, username)) => {
            conn.set_authed(id, username);
            join_default_room(ctx, conn)
        }
        Err(AppError::WrongCredentials) => {
            Response::fail().msg("wrong username or password")
        }
        Err(AppError::BadSmsCode) => Response::fail().msg("invalid or expired code"),
        Err(AppError::UserNotFound) => Response::fail().msg("phone not registered"),
        Err(AppError::RateLimited) => Response::fail().msg("too many attempts, try later"),
        Err(_) => Response::fail().msg("login failed"),
    }
}

async fn register(ctx: &AppContext, req: &Request) -> Response {
    match req.i64("step") {
        Some(1) => {
            let phone = match req.str("phone") {
                Some(p) => p,
                None => return Response::fail().err("phone required"),
            };
            let kv = match ctx.kv_pool.acquire().await {
                Some(kv) => kv,
                None => return Response::fail().msg("register failed"),
            };
            match ctx.sms.request_code(&kv, phone) {
                Ok(()) => Response::ok().msg("code sent"),
                Err(AppError::SmsCooldown) => Response::fail().msg("please wait before resending"),
                Err(_) => Response::fail().msg("register failed"),
            }
        }
        Some(2) => {
            let phone = req.str("phone");
            let code = req.str("code");
            let user = req.str("user");
            let pass = req.str("pass");
            let pass2 = req.str("pass2");
            let (phone, code, user, pass, pass2) = match (phone, code, user, pass, pass2) {
                (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
                _ => return Response::fail().err("missing fields"),
            };
            if pass != pass2 {
                return Response::fail().msg("passwords do not match");
            }
            let verified = match ctx.kv_pool.acquire().await {
                Some(kv) => ctx.sms.verify_code(&kv, phone, code),
                None => return Response::fail().msg("register failed"),
            };
            if !verified {
                return Response::fail().msg("invalid or expired code");
            }
            match ctx.auth.register(phone, user, pass).await {
                Ok(id) => Response::ok()
                    .msg("register success")
                    .field("user", user.to_string())
                    .field("userId", id),
                Err(AppError::AlreadyRegistered) => {
                    Response::fail().msg("username or phone already registered")
                }
                Err(_) => Response::fail().msg("register failed"),
            }
        }
        _ => Response::fail().err("step required"),
    }
}

async fn reset_pass(ctx: &AppContext, req: &Request) -> Response {
    match req.i64("step") {
        Some(1) => {
            let phone = match req.str("phone") {
                Some(p) => p,
                None => return Response::fail().err("phone required"),
            };
            let kv = match ctx.kv_pool.acquire().await {
                Some(kv) => kv,
                None => return Response::fail().msg("reset failed"),
            };
            match ctx.sms.request_code(&kv, phone) {
                Ok(()) => Response::ok().msg("code sent"),
                Err(AppError::SmsCooldown) => Response::fail().msg("please wait before resending"),
                Err(_) => Response::fail().msg("reset failed"),
            }
        }
        Some(2) => {
            let (phone, code, new_pass) = match (req.str("phone"), req.str("code"), req.str("newPass")) {
                (Some(p), Some(c), Some(n)) => (p, c, n),
                _ => return Response::fail().err("missing fields"),
            };
            let verified = match ctx.kv_pool.acquire().await {
                Some(kv) => ctx.sms.verify_code(&kv, phone, code),
                None => return Response::fail().msg("reset failed"),
            };
            if !verified {
                return Response::fail().msg("invalid or expired code");
            }
            match ctx.auth.reset_password(phone, new_pass).await {
                Ok(()) => Response::ok().msg("password reset"),
                Err(AppError::UserNotFound) => Response::fail().msg("phone not registered"),
                Err(_) => Response::fail().msg("reset failed"),
            }
        }
        _ => Response::fail().err("step required"),
    }
}

async fn update_name(ctx: &AppContext, conn: &Connection, req: &Request) -> Response {
    if let Err(resp) = require_auth(conn) {
        return resp;
    }
    let new_name = match req.str("newName") {
        Some(n) => n,
        None => return Response::fail().err("newName required"),
    };
    let user_id = conn.session.lock().unwrap().user_id;
    match ctx.auth.rename(user_id, new_name).await {
        Ok((old_name, new_name, phone)) => {
            conn.set_authed(user_id, new_name.clone());
            Response::ok()
                .field("oldName", old_name)
                .field("newName", new_name)
                .field("phone", phone)
        }
        Err(AppError::AlreadyRegistered) => Response::fail().msg("username already taken"),
        Err(_) => Response::fail().msg("update failed"),
    }
}

async fn join_room(ctx: &AppContext, conn: &Connection, req: &Request) -> Response {
    if let Err(resp) = require_auth(conn) {
        return resp;
    }
    let room_id = match req.i64("roomId") {
        Some(r) => r,
        None => return Response::fail().err("roomId required"),
    };
    if ctx.rooms.try_join(room_id, ctx.config.max_room_size) {
        let old_room = conn.room_id();
        if old_room != 0 && old_room != room_id {
            ctx.rooms.leave(old_room);
        }
        conn.set_room(room_id);
        Response::ok().field("roomId", room_id)
    } else {
        Response::fail().msg("room is full").field("roomId", 0)
    }
}

async fn leave_room(ctx: &AppContext, conn: &Connection) -> Response {
    if let Err(resp) = require_auth(conn) {
        return resp;
    }
    let room_id = conn.room_id();
    if room_id != 0 {
        ctx.rooms.leave(room_id);
        conn.clear_room();
    }
    Response::ok().msg("left room")
}

async fn list_rooms(ctx: &AppContext) -> Response {
    let snapshot = ctx.rooms.snapshot();
    let rooms: Vec<serde_json::Value> = snapshot
        .into_iter()
        .map(|(room_id, size)| serde_json::json!({"roomId": room_id, "size": size}))
        .collect();
    Response::ok().field("rooms", rooms)
}

async fn send_msg(ctx: &AppContext, conn: &Connection, req: &Request) -> Response {
    if let Err(resp) = require_auth(conn) {
        return resp;
    }
    let text = match req.str("text") {
        Some(t) if !t.is_empty() => t,
        _ => return Response::fail().err("text required"),
    };
    let (user_id, username, room_id) = {
        let session = conn.session.lock().unwrap();
        (session.user_id, session.username.clone(), session.room_id)
    };
    if room_id == 0 {
        return Response::fail().msg("not in a room");
    }

    let saved = match ctx.chat.save(room_id, user_id, &username, text).await {
        Some(m) => m,
        None => return Response::fail().msg("send failed"),
    };
    let _ = ctx.chat.invalidate(room_id).await;

    Response::ok()
        .broadcast()
        .field("roomId", room_id)
        .field("fromId", user_id)
        .field("fromName", username)
        .field("text", text.to_string())
        .field("ts", saved.ts)
}

async fn get_history(ctx: &AppContext, conn: &Connection, req: &Request) -> Response {
    if let Err(resp) = require_auth(conn) {
        return resp;
    }
    let room_id = conn.room_id();
    let limit = req.i64("limit").unwrap_or(DEFAULT_HISTORY_LIMIT);
    match ctx.chat.get_history(room_id, limit).await {
        Ok(history) => {
            let history = history
                .into_iter()
                .map(|m| {
                    serde_json::json!({
                        "id": m.id,
                        "roomId": m.room_id,
                        "fromId": m.user_id,
                        "fromName": m.username,
                        "text": m.text,
                        "ts": m.ts,
                    })
                })
                .collect::<Vec<_>>();
            Response::ok().field("roomId", room_id).field("history", history)
        }
        Err(_) => Response::fail().msg("get history failed"),
    }
}
