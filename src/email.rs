use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::config::{Environment, SmtpConfig};

/// Outbound email boundary. Delivery either succeeds or fails once; no
/// retries happen here.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig, env: Environment) -> anyhow::Result<Self> {
        // Development points at a capture relay (e.g. mailtrap) without TLS;
        // production authenticates against the real relay.
        let mut builder = if env.is_production() {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
        }
        .port(cfg.port);
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;
        self.transport.send(message).await?;
        debug!(%to, %subject, "email sent");
        Ok(())
    }
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

pub async fn send_welcome(
    mailer: &dyn Mailer,
    to: &str,
    name: &str,
    account_url: &str,
) -> anyhow::Result<()> {
    let body = format!(
        "Hi {},\n\nWelcome to Trailbook, we're glad to have you!\n\
         Manage your account here: {}\n",
        first_name(name),
        account_url
    );
    mailer.send(to, "Welcome to the Trailbook family!", &body).await
}

pub async fn send_password_reset(
    mailer: &dyn Mailer,
    to: &str,
    name: &str,
    reset_url: &str,
) -> anyhow::Result<()> {
    let body = format!(
        "Hi {},\n\nForgot your password? Submit a PATCH request with your new \
         password to: {}\nIf you didn't request this, just ignore this email.\n",
        first_name(name),
        reset_url
    );
    mailer
        .send(
            to,
            "Your password reset token (valid for only 10 minutes)",
            &body,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_takes_leading_word() {
        assert_eq!(first_name("Ada Lovelace"), "Ada");
        assert_eq!(first_name("Plato"), "Plato");
        assert_eq!(first_name(""), "");
    }
}
