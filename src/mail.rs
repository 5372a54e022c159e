use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::*;
use crate::observability;

/// One outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailData {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub content: String,
}

#[derive(Debug)]
pub enum MailError {
    /// The transport refused the message (bad address, policy).
    Rejected(String),
    /// The transport could not be reached.
    Unavailable(String),
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Rejected(msg) => write!(f, "mail rejected: {msg}"),
            MailError::Unavailable(msg) => write!(f, "mail transport unavailable: {msg}"),
        }
    }
}

impl std::error::Error for MailError {}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &MailData) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, mail: &MailData) -> Result<(), MailError> {
        info!("mail to={} from={} subject={:?}", mail.to, mail.from, mail.subject);
        debug!("mail body:\n{}", mail.content);
        Ok(())
    }
}

pub struct Mailer {
    pub from: String,
    pub owner_email: String,
    pub transport: Arc<dyn MailTransport>,
}

/// Guest confirmation and owner notice for a committed reservation.
pub fn reservation_mails(reservation: &Reservation, room_name: &str, from: &str, owner_email: &str) -> [MailData; 2] {
    let arrival = format_date(reservation.stay.start());
    let departure = format_date(reservation.stay.end());
    let guest = MailData {
        to: reservation.guest.email.clone(),
        from: from.to_string(),
        subject: "Reservation Confirmation".into(),
        content: format!(
            "Dear {},\n\nThis is to confirm your reservation #{} of the {} from {} to {}.\n",
            reservation.guest.first_name, reservation.id, room_name, arrival, departure
        ),
    };
    let owner = MailData {
        to: owner_email.to_string(),
        from: from.to_string(),
        subject: "Reservation Notification".into(),
        content: format!(
            "A reservation #{} has been made for the {} from {} to {} by {} <{}>.\n",
            reservation.id,
            room_name,
            arrival,
            departure,
            reservation.guest.full_name(),
            reservation.guest.email
        ),
    };
    [guest, owner]
}

impl Mailer {
    async fn deliver(&self, kind: &'static str, mail: &MailData) {
        match self.transport.send(mail).await {
            Ok(()) => {
                metrics::counter!(observability::MAIL_SENT_TOTAL, "kind" => kind).increment(1);
            }
            Err(e) => {
                // Best effort: no retry.
                metrics::counter!(observability::MAIL_FAILED_TOTAL, "kind" => kind).increment(1);
                warn!("{kind} mail to {} failed: {e}", mail.to);
            }
        }
    }
}

/// Background task mailing guest and owner for every committed reservation.
/// Runs until the engine's notification hub is dropped.
pub async fn run_mailer(engine: Arc<Engine>, mailer: Mailer) {
    let mut rx = engine.notify.subscribe();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!("mailer lagged, {missed} events skipped");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        let Event::ReservationCreated { reservation, .. } = event else {
            continue;
        };
        let room_name = match engine.get_room(reservation.room_id).await {
            Ok(room) => room.name,
            Err(e) => {
                debug!("mailer: room lookup for reservation {} failed: {e}", reservation.id);
                format!("room {}", reservation.room_id)
            }
        };
        let [guest, owner] = reservation_mails(&reservation, &room_name, &mailer.from, &mailer.owner_email);
        mailer.deliver("guest", &guest).await;
        mailer.deliver("owner", &owner).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::engine::DEFAULT_STORE_TIMEOUT;
    use crate::notify::NotifyHub;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<MailData>>,
        reject_owner: bool,
    }

    #[async_trait]
    impl MailTransport for Recorder {
        async fn send(&self, mail: &MailData) -> Result<(), MailError> {
            if self.reject_owner && mail.to == "owner@test.local" {
                return Err(MailError::Rejected("mailbox full".into()));
            }
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    fn wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("hotel_test_mail");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking(room_id: RoomId) -> NewReservation {
        NewReservation {
            guest: Guest {
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                email: "grace@example.com".into(),
                phone: String::new(),
            },
            stay: DateRange::new(parse_date("2024-03-10").unwrap(), parse_date("2024-03-12").unwrap()).unwrap(),
            room_id,
        }
    }

    async fn wait_for(recorder: &Recorder, n: usize) -> Vec<MailData> {
        for _ in 0..100 {
            let sent = recorder.sent.lock().unwrap().clone();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        recorder.sent.lock().unwrap().clone()
    }

    #[test]
    fn mails_name_room_and_dates() {
        let reservation = Reservation {
            id: 77,
            guest: booking(5).guest,
            stay: booking(5).stay,
            room_id: 5,
            processed: false,
            created_at: 0,
            updated_at: 0,
        };
        let [guest, owner] = reservation_mails(&reservation, "Major's Suite", "desk@test.local", "owner@test.local");
        assert_eq!(guest.to, "grace@example.com");
        assert!(guest.content.contains("Major's Suite"));
        assert!(guest.content.contains("2024-03-10"));
        assert_eq!(owner.to, "owner@test.local");
        assert!(owner.content.contains("Grace Hopper"));
        assert!(owner.content.contains("#77"));
    }

    #[tokio::test]
    async fn committed_reservation_mails_guest_and_owner() {
        let engine = Arc::new(
            Engine::new(wal_path("mail_both.wal"), Arc::new(NotifyHub::new()), DEFAULT_STORE_TIMEOUT).unwrap(),
        );
        engine.create_room(1, "General's Quarters").await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let mailer = Mailer {
            from: "desk@test.local".into(),
            owner_email: "owner@test.local".into(),
            transport: recorder.clone(),
        };
        let task = tokio::spawn(run_mailer(engine.clone(), mailer));
        // let the task subscribe before the event is sent
        while engine.notify.listener_count() == 0 {
            tokio::task::yield_now().await;
        }

        engine.create_reservation(booking(1)).await.unwrap();
        let sent = wait_for(&recorder, 2).await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "Reservation Confirmation");
        assert!(sent[0].content.contains("General's Quarters"));
        assert_eq!(sent[1].to, "owner@test.local");
        task.abort();
    }

    #[tokio::test]
    async fn failed_delivery_does_not_stop_the_mailer() {
        let engine = Arc::new(
            Engine::new(wal_path("mail_fail.wal"), Arc::new(NotifyHub::new()), DEFAULT_STORE_TIMEOUT).unwrap(),
        );
        engine.create_room(1, "General's Quarters").await.unwrap();
        engine.create_room(2, "Major's Suite").await.unwrap();

        let recorder = Arc::new(Recorder {
            reject_owner: true,
            ..Default::default()
        });
        let mailer = Mailer {
            from: "desk@test.local".into(),
            owner_email: "owner@test.local".into(),
            transport: recorder.clone(),
        };
        let task = tokio::spawn(run_mailer(engine.clone(), mailer));
        while engine.notify.listener_count() == 0 {
            tokio::task::yield_now().await;
        }

        engine.create_reservation(booking(1)).await.unwrap();
        engine.create_reservation(booking(2)).await.unwrap();
        let sent = wait_for(&recorder, 2).await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.to == "grace@example.com"));
        task.abort();
    }
}
