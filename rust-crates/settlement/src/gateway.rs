use crate::{
    api::{
        ClaimDto,
        ErrorDto,
        PollDto,
        ReelsDto,
        SpinRequestDto,
        SubmittedDto,
    },
    simulated::SimulatedSettlement,
};
use actix_cors::Cors;
use actix_web::{
    App,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    http::StatusCode,
    web,
};
use anyhow::Context;
use reel_engine::{
    layout::ReelLayoutSource,
    settlement::{
        SettlementAuthority,
        SettlementError,
        TransactionRef,
    },
};
use std::{
    net::TcpListener,
    thread::JoinHandle,
};

/// Serves a [`SimulatedSettlement`] over HTTP on its own actix system thread.
pub struct SettlementGateway {
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl SettlementGateway {
    pub fn new(settlement: SimulatedSettlement, port: Option<u16>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .context("failed to bind HTTP listener for settlement gateway")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("settlement gateway listening on {}", base_url);

        let server = HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(settlement.clone()))
                .route("/reels", web::get().to(handle_reels))
                .route("/spins", web::post().to(handle_submit))
                .route("/spins/{transaction}", web::get().to(handle_poll))
                .route("/spins/{transaction}/claim", web::post().to(handle_claim))
        })
        .workers(1)
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for SettlementGateway {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

fn error_response(err: SettlementError) -> HttpResponse {
    let status = match &err {
        SettlementError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
        SettlementError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    HttpResponse::build(status).json(ErrorDto {
        error: err.to_string(),
    })
}

async fn handle_reels(settlement: web::Data<SimulatedSettlement>) -> HttpResponse {
    match settlement.reel_strips().await {
        Ok(reels) => HttpResponse::Ok().json(ReelsDto { reels }),
        Err(err) => {
            tracing::warn!(%err, "reel layout request failed");
            HttpResponse::ServiceUnavailable().json(ErrorDto {
                error: err.to_string(),
            })
        }
    }
}

async fn handle_submit(
    settlement: web::Data<SimulatedSettlement>,
    request: web::Json<SpinRequestDto>,
) -> HttpResponse {
    let submission = match request.into_inner().into_submission() {
        Ok(submission) => submission,
        Err(reason) => return HttpResponse::BadRequest().json(ErrorDto { error: reason }),
    };
    tracing::info!(spin_id = %submission.spin_id, "received spin submission");
    match settlement.submit_spin(&submission).await {
        Ok(transaction) => HttpResponse::Ok().json(SubmittedDto {
            transaction: transaction.to_string(),
        }),
        Err(err) => error_response(err),
    }
}

async fn handle_poll(
    settlement: web::Data<SimulatedSettlement>,
    transaction: web::Path<String>,
) -> HttpResponse {
    let transaction = TransactionRef::new(transaction.into_inner());
    match settlement.poll_outcome(&transaction).await {
        Ok(status) => HttpResponse::Ok().json(PollDto::from(status)),
        Err(err) => error_response(err),
    }
}

async fn handle_claim(
    settlement: web::Data<SimulatedSettlement>,
    transaction: web::Path<String>,
) -> HttpResponse {
    let transaction = TransactionRef::new(transaction.into_inner());
    tracing::info!(%transaction, "received claim");
    match settlement.claim_spin(&transaction).await {
        Ok(payout) => HttpResponse::Ok().json(ClaimDto { payout }),
        Err(err) => error_response(err),
    }
}
