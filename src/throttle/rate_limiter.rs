// DANS : src/throttle/rate_limiter.rs

use std::{collections::VecDeque, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::trace;

/// Limiteur à fenêtre glissante : au plus `max_requests` acquisitions par `time_window`.
/// Un appelant en excès attend que la plus ancienne acquisition sorte de la fenêtre,
/// il ne reçoit jamais d'erreur.
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    time_window: Duration,
    acquisitions: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_requests: usize, time_window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            time_window,
            acquisitions: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.acquisitions.lock().await;
                let now = Instant::now();
                while window.front().is_some_and(|at| now.duration_since(*at) >= self.time_window) {
                    window.pop_front();
                }
                if window.len() < self.max_requests {
                    window.push_back(now);
                    return;
                }
                // Fenêtre pleine : on attend la sortie de la plus ancienne.
                match window.front() {
                    Some(oldest) => (*oldest + self.time_window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            trace!("[RateLimiter] Fenêtre pleine, attente de {:?}.", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Acquisitions encore comptées dans la fenêtre courante.
    pub async fn in_flight(&self) -> usize {
        let window = self.acquisitions.lock().await;
        let now = Instant::now();
        window.iter().filter(|at| now.duration_since(**at) < self.time_window).count()
    }
}
