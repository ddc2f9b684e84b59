//! Newline-delimited JSON front-end.
//!
//! One request per line:
//! `{"principal":{"user_id":"01J..."},"request":{"op":"initiate",...}}`.
//! One reply per line: `{"ok":true,"data":...}` or
//! `{"ok":false,"error":{"kind":"unavailable","message":"..."}}`.
//! Booking updates for watched bookings are pushed as `{"notify":{...}}`.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::{DEFAULT_INVENTORY_DAYS, MAX_REQUEST_LINE_BYTES};
use crate::model::{decimal_str, opt_decimal_str, BookingUpdate, Gender, Principal, RoomSpec};
use crate::observability;
use crate::payment::GatewayEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Initiate {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        rooms_count: u32,
    },
    AddGuests {
        booking_id: Ulid,
        guest_ids: Vec<Ulid>,
    },
    InitiatePayment {
        booking_id: Ulid,
    },
    Cancel {
        booking_id: Ulid,
    },
    Status {
        booking_id: Ulid,
    },
    Booking {
        booking_id: Ulid,
    },
    MyBookings,
    Watch {
        booking_id: Ulid,
    },
    /// Provider webhook body, verbatim. Needs no principal.
    GatewayEvent {
        payload: String,
    },
    OpenRoom {
        room_id: Ulid,
        hotel_id: Ulid,
        #[serde(with = "decimal_str")]
        base_price: Decimal,
        total_count: u32,
        first_date: NaiveDate,
        #[serde(default)]
        days: Option<u32>,
    },
    RemoveRoom {
        room_id: Ulid,
    },
    AdjustInventory {
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        #[serde(default)]
        closed: Option<bool>,
        #[serde(default, with = "opt_decimal_str")]
        surge_factor: Option<Decimal>,
    },
    RoomInventory {
        room_id: Ulid,
    },
    AddGuest {
        name: String,
        #[serde(default)]
        gender: Option<Gender>,
        #[serde(default)]
        age: Option<u32>,
    },
    UpdateGuest {
        guest_id: Ulid,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        gender: Option<Gender>,
        #[serde(default)]
        age: Option<u32>,
    },
    RemoveGuest {
        guest_id: Ulid,
    },
    ListGuests,
    HotelReport {
        hotel_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    HotelBookings {
        hotel_id: Ulid,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Request::Initiate { .. } => "initiate",
            Request::AddGuests { .. } => "add_guests",
            Request::InitiatePayment { .. } => "initiate_payment",
            Request::Cancel { .. } => "cancel",
            Request::Status { .. } => "status",
            Request::Booking { .. } => "booking",
            Request::MyBookings => "my_bookings",
            Request::Watch { .. } => "watch",
            Request::GatewayEvent { .. } => "gateway_event",
            Request::OpenRoom { .. } => "open_room",
            Request::RemoveRoom { .. } => "remove_room",
            Request::AdjustInventory { .. } => "adjust_inventory",
            Request::RoomInventory { .. } => "room_inventory",
            Request::AddGuest { .. } => "add_guest",
            Request::UpdateGuest { .. } => "update_guest",
            Request::RemoveGuest { .. } => "remove_guest",
            Request::ListGuests => "list_guests",
            Request::HotelReport { .. } => "hotel_report",
            Request::HotelBookings { .. } => "hotel_bookings",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub principal: Option<Principal>,
    pub request: Request,
}

fn ok_reply(data: Value) -> Value {
    json!({ "ok": true, "data": data })
}

fn error_reply(kind: &str, message: String) -> Value {
    json!({ "ok": false, "error": { "kind": kind, "message": message } })
}

fn data<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Storage(format!("encode reply: {e}")))
}

fn principal(envelope_principal: Option<Principal>) -> Result<Principal, EngineError> {
    envelope_principal.ok_or(EngineError::InvalidRequest("principal is required"))
}

/// Per-connection side effects a request can ask for.
enum Effect {
    None,
    Watch(broadcast::Receiver<BookingUpdate>),
}

async fn execute(engine: &Engine, envelope: Envelope) -> Result<(Value, Effect), EngineError> {
    let Envelope { principal: who, request } = envelope;
    if let Request::GatewayEvent { payload } = request {
        let event = GatewayEvent::from_json(payload.as_bytes())
            .map_err(|_| EngineError::InvalidRequest("malformed gateway payload"))?;
        let view = engine.handle_gateway_event(event).await?;
        return Ok((data(view)?, Effect::None));
    }
    execute_as(engine, &principal(who)?, request).await
}

async fn execute_as(engine: &Engine, p: &Principal, request: Request) -> Result<(Value, Effect), EngineError> {
    let value = match request {
        Request::Initiate {
            room_id,
            check_in,
            check_out,
            rooms_count,
        } => data(engine.initiate(p, room_id, check_in, check_out, rooms_count).await?)?,
        Request::AddGuests {
            booking_id,
            guest_ids,
        } => data(engine.add_guests(p, booking_id, &guest_ids).await?)?,
        Request::InitiatePayment { booking_id } => data(engine.initiate_payment(p, booking_id).await?)?,
        Request::Cancel { booking_id } => data(engine.cancel(p, booking_id).await?)?,
        Request::Status { booking_id } => {
            let view = engine.booking(p, booking_id).await?;
            json!({
                "booking_id": booking_id,
                "status": view.status,
                "expired": view.expired,
            })
        }
        Request::Booking { booking_id } => data(engine.booking(p, booking_id).await?)?,
        Request::MyBookings => data(engine.my_bookings(p).await)?,
        Request::Watch { booking_id } => {
            let view = engine.booking(p, booking_id).await?;
            let rx = engine.notify.subscribe(booking_id);
            return Ok((data(view)?, Effect::Watch(rx)));
        }
        Request::GatewayEvent { .. } => {
            return Err(EngineError::InvalidRequest("gateway events are not principal requests"));
        }
        Request::OpenRoom {
            room_id,
            hotel_id,
            base_price,
            total_count,
            first_date,
            days,
        } => {
            let spec = RoomSpec {
                room_id,
                hotel_id,
                owner_id: p.user_id,
                base_price,
                total_count,
            };
            let days = days.unwrap_or(DEFAULT_INVENTORY_DAYS);
            data(engine.open_room(p, spec, first_date, days).await?)?
        }
        Request::RemoveRoom { room_id } => {
            engine.remove_room(p, room_id).await?;
            Value::Null
        }
        Request::AdjustInventory {
            room_id,
            start,
            end,
            closed,
            surge_factor,
        } => {
            let updated = engine
                .adjust_inventory(p, room_id, start, end, closed, surge_factor)
                .await?;
            json!({ "updated": updated })
        }
        Request::RoomInventory { room_id } => data(engine.room_inventory(p, room_id).await?)?,
        Request::AddGuest { name, gender, age } => data(engine.add_guest(p, &name, gender, age).await?)?,
        Request::UpdateGuest {
            guest_id,
            name,
            gender,
            age,
        } => data(
            engine
                .update_guest(p, guest_id, name.as_deref(), gender, age)
                .await?,
        )?,
        Request::RemoveGuest { guest_id } => {
            engine.remove_guest(p, guest_id).await?;
            Value::Null
        }
        Request::ListGuests => data(engine.list_guests(p))?,
        Request::HotelReport { hotel_id, from, to } => data(engine.hotel_report(p, hotel_id, from, to).await?)?,
        Request::HotelBookings { hotel_id } => data(engine.hotel_bookings(p, hotel_id).await?)?,
    };
    Ok((value, Effect::None))
}

/// Parse and run one request line. Never fails: errors become error replies.
async fn handle_line(engine: &Engine, line: &str) -> (Value, Effect) {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(env) => env,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "unparsed", "status" => "error")
                .increment(1);
            return (error_reply("invalid_request", e.to_string()), Effect::None);
        }
    };
    let op = envelope.request.label();
    let started = Instant::now();
    let result = execute(engine, envelope).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    match result {
        Ok((value, effect)) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            (ok_reply(value), effect)
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "error").increment(1);
            debug!("{op} failed: {e}");
            (error_reply(e.kind(), e.to_string()), Effect::None)
        }
    }
}

/// Forward one booking's broadcast into the connection's push queue until
/// either side goes away.
fn spawn_watch(mut rx: broadcast::Receiver<BookingUpdate>, push: mpsc::UnboundedSender<BookingUpdate>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if push.send(update).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => debug!("watch lagged by {n} updates"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_BYTES));
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<BookingUpdate>();

    loop {
        tokio::select! {
            line = framed.next() => {
                let reply = match line {
                    None => break,
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => {
                        let (reply, effect) = handle_line(&engine, &line).await;
                        if let Effect::Watch(rx) = effect {
                            spawn_watch(rx, push_tx.clone());
                        }
                        reply
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        error_reply("limit_exceeded", format!("request line exceeds {MAX_REQUEST_LINE_BYTES} bytes"))
                    }
                    Some(Err(e)) => return Err(e),
                };
                framed.send(reply.to_string()).await?;
            }
            Some(update) = push_rx.recv() => {
                framed.send(json!({ "notify": update }).to_string()).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_initiate_envelope() {
        let line = r#"{"principal":{"user_id":"01HZY8J5Q9W3V6X2B7N4M1K0PA"},
            "request":{"op":"initiate","room_id":"01HZY8J5Q9W3V6X2B7N4M1K0PB",
            "check_in":"2026-11-02","check_out":"2026-11-04","rooms_count":2}}"#;
        let env: Envelope = serde_json::from_str(line).unwrap();
        assert!(env.principal.is_some());
        match env.request {
            Request::Initiate {
                check_in,
                rooms_count,
                ..
            } => {
                assert_eq!(check_in, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap());
                assert_eq!(rooms_count, 2);
            }
            other => panic!("wrong request: {other:?}"),
        }
    }

    #[test]
    fn parse_adjust_with_surge_string() {
        let line = r#"{"principal":{"user_id":"01HZY8J5Q9W3V6X2B7N4M1K0PA"},
            "request":{"op":"adjust_inventory","room_id":"01HZY8J5Q9W3V6X2B7N4M1K0PB",
            "start":"2026-12-20","end":"2026-12-31","surge_factor":"1.4"}}"#;
        let env: Envelope = serde_json::from_str(line).unwrap();
        let Request::AdjustInventory {
            closed,
            surge_factor,
            ..
        } = env.request
        else {
            panic!("wrong request");
        };
        assert_eq!(closed, None);
        assert_eq!(surge_factor, Some(rust_decimal_macros::dec!(1.4)));
    }

    #[test]
    fn unit_ops_parse_without_fields() {
        let env: Envelope = serde_json::from_str(r#"{"request":{"op":"list_guests"}}"#).unwrap();
        assert_eq!(env.request.label(), "list_guests");
        assert!(env.principal.is_none());
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"request":{"op":"drop_tables"}}"#).is_err());
    }

    #[test]
    fn error_reply_shape() {
        let v = error_reply("unavailable", "sold out".into());
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "unavailable");
    }

    #[test]
    fn missing_principal_is_invalid_request() {
        let err = principal(None).unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
}
