use super::command_reader::{Command, Op};
use super::outcome_writer::OutcomeRecord;
use crate::application::service::PaymentService;
use crate::error::{PaymentError, Result};

/// Executes one command against the service and describes the result.
pub async fn execute(service: &PaymentService, command: Command) -> Result<OutcomeRecord> {
    let mut record = OutcomeRecord {
        op: command.op.to_string(),
        account: command.account.clone(),
        amount: command.amount,
        ..OutcomeRecord::default()
    };
    let flow = command.flow.as_deref();

    record.outcome = match command.op {
        Op::Open => {
            service.open_account(&command.account).await?;
            "opened".to_string()
        }
        Op::Fund => {
            service
                .fund(&command.account, required_amount(&command)?)
                .await?;
            "funded".to_string()
        }
        Op::Authorize => {
            let response = service
                .authorize(&command.account, required_amount(&command)?, flow)
                .await?;
            let outcome = if response.authorized { "authorized" } else { "declined" };
            outcome.to_string()
        }
        Op::Present => {
            let response = service
                .present(&command.account, required_amount(&command)?, flow)
                .await?;
            let outcome = if response.matched { "captured" } else { "declined" };
            outcome.to_string()
        }
        Op::Balance => {
            let balance = service.balance(&command.account).await?;
            record.debits_posted = Some(balance.debits_posted);
            record.credits_posted = Some(balance.credits_posted);
            record.debits_pending = Some(balance.debits_pending);
            record.credits_pending = Some(balance.credits_pending);
            "ok".to_string()
        }
        Op::Available => {
            let available = service.available_balance(&command.account).await?;
            record.available = Some(available.amount);
            "ok".to_string()
        }
    };
    Ok(record)
}

fn required_amount(command: &Command) -> Result<u64> {
    command.amount.ok_or_else(|| {
        PaymentError::ValidationError(format!("{} requires an amount", command.op))
    })
}
